//! Tree node: one region of the point space
//!
//! Split node: (split_dimension, threshold) with two owned children
//!   below: rows with value <  threshold  (path + [0])
//!   above: rows with value >= threshold  (path + [1])
//! Leaf node: no children
//!
//! Nodes are built once per training call and never mutated.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::path::{Branch, NodePath};
use super::TreeError;
use crate::util::column_median;

/// Smoothing constant added to both sides of the log ratio
pub const SMOOTH: f64 = 1e-7;

/// Leaf or split payload of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Terminal region
    Leaf,

    /// Internal region split along one column
    Split {
        /// Column the region is split on
        split_dimension: usize,
        /// Median of the training subset along `split_dimension`
        threshold: f64,
        /// Child for `value < threshold`
        below: Box<Node>,
        /// Child for `value >= threshold`
        above: Box<Node>,
    },
}

/// One node of a trained tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    path: NodePath,
    size: usize,
    dim: usize,
    probability: f64,
    kind: NodeKind,
}

/// Shared inputs of one training call
pub(crate) struct BuildContext<'a, 'c> {
    pub points: ArrayView2<'a, f64>,
    pub data_size: usize,
    pub limit: usize,
    pub max_depth: usize,
    pub parallel_depth: usize,
    pub degenerate_splits: &'c AtomicUsize,
}

/// Shared inputs of one encoding call
pub(crate) struct EncodeContext<'a> {
    pub points: ArrayView2<'a, f64>,
    pub full_data_size: usize,
    pub limit: usize,
    pub parallel_depth: usize,
}

impl Node {
    /// Recursively build the subtree for `rows` of the training matrix.
    ///
    /// Every node owns its generator; children get generators seeded from
    /// the parent's stream before any recursion, so the shape depends only
    /// on the root seed, not on scheduling.
    pub(crate) fn build<R>(
        ctx: &BuildContext<'_, '_>,
        rows: Vec<usize>,
        path: NodePath,
        mut rng: R,
    ) -> Result<Node, TreeError>
    where
        R: Rng + SeedableRng + Send,
    {
        let size = rows.len();
        let dim = ctx.points.ncols();
        let probability = size as f64 / ctx.data_size as f64;

        if size == 0 || size < ctx.limit || path.len() > ctx.max_depth {
            return Ok(Node {
                path,
                size,
                dim,
                probability,
                kind: NodeKind::Leaf,
            });
        }

        let split_dimension = rng.gen_range(0..dim);
        let threshold = column_median(ctx.points, &rows, split_dimension).ok_or_else(|| {
            TreeError::InvalidInput(format!("no median for empty subset at path '{}'", path))
        })?;
        let (below_rows, above_rows) = partition(ctx.points, &rows, split_dimension, threshold);
        drop(rows);

        if below_rows.is_empty() || above_rows.is_empty() {
            ctx.degenerate_splits.fetch_add(1, Ordering::Relaxed);
            trace!(
                path = %path,
                split_dimension,
                threshold,
                size,
                "degenerate split, one child is empty"
            );
        }

        let below_rng = R::seed_from_u64(rng.gen());
        let above_rng = R::seed_from_u64(rng.gen());
        let below_path = path.child(Branch::Below);
        let above_path = path.child(Branch::Above);

        let (above, below) = if path.len() < ctx.parallel_depth {
            rayon::join(
                || Node::build(ctx, above_rows, above_path, above_rng),
                || Node::build(ctx, below_rows, below_path, below_rng),
            )
        } else {
            (
                Node::build(ctx, above_rows, above_path, above_rng),
                Node::build(ctx, below_rows, below_path, below_rng),
            )
        };

        Ok(Node {
            path,
            size,
            dim,
            probability,
            kind: NodeKind::Split {
                split_dimension,
                threshold,
                below: Box::new(below?),
                above: Box::new(above?),
            },
        })
    }

    /// Log-ratio code of `rows` for this subtree, in pre-order
    /// (self, above subtree, below subtree).
    ///
    /// Replays the stored split decisions; nothing is recomputed from the
    /// query. Descent stops at leaves and at query subsets smaller than
    /// `limit` (an empty subset never descends).
    pub(crate) fn encode(&self, ctx: &EncodeContext<'_>, rows: &[usize]) -> Vec<(NodePath, f64)> {
        let my_probability = if ctx.full_data_size == 0 {
            0.0
        } else {
            rows.len() as f64 / ctx.full_data_size as f64
        };
        let log_ratio = ((my_probability + SMOOTH) / (self.probability + SMOOTH)).ln();
        let mine = (self.path.clone(), log_ratio);

        let (split_dimension, threshold, below, above) = match &self.kind {
            NodeKind::Split {
                split_dimension,
                threshold,
                below,
                above,
            } if !rows.is_empty() && rows.len() >= ctx.limit => {
                (*split_dimension, *threshold, below, above)
            }
            _ => return vec![mine],
        };

        let (below_rows, above_rows) = partition(ctx.points, rows, split_dimension, threshold);

        let (above_codes, below_codes) = if self.path.len() < ctx.parallel_depth {
            rayon::join(
                || above.encode(ctx, &above_rows),
                || below.encode(ctx, &below_rows),
            )
        } else {
            (above.encode(ctx, &above_rows), below.encode(ctx, &below_rows))
        };

        let mut codes = Vec::with_capacity(1 + above_codes.len() + below_codes.len());
        codes.push(mine);
        codes.extend(above_codes);
        codes.extend(below_codes);
        codes
    }

    /// Breadth-first dump of the first `levels` levels of this subtree,
    /// one [`Display`](fmt::Display) line per node, above before below
    pub fn level_dump(&self, levels: usize) -> String {
        let mut lines = Vec::new();
        let mut queue = VecDeque::from([self]);

        for _ in 0..levels {
            if queue.is_empty() {
                break;
            }
            let mut next = VecDeque::new();
            for node in queue {
                lines.push(node.to_string());
                if let Some((below, above)) = node.children() {
                    next.push_back(above);
                    next.push_back(below);
                }
            }
            queue = next;
        }

        lines.join("\n")
    }

    /// Position of this node
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Number of training points routed here
    pub fn size(&self) -> usize {
        self.size
    }

    /// Dimensionality of the training points
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Fraction of all training points routed here
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Leaf or split payload
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Check if leaf
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    /// `(split_dimension, threshold)` of a split node
    pub fn split(&self) -> Option<(usize, f64)> {
        match &self.kind {
            NodeKind::Split {
                split_dimension,
                threshold,
                ..
            } => Some((*split_dimension, *threshold)),
            NodeKind::Leaf => None,
        }
    }

    /// `(below, above)` children of a split node
    pub fn children(&self) -> Option<(&Node, &Node)> {
        match &self.kind {
            NodeKind::Split { below, above, .. } => Some((below, above)),
            NodeKind::Leaf => None,
        }
    }

    /// Child on the given side of the split
    pub fn child(&self, branch: Branch) -> Option<&Node> {
        self.children().map(|(below, above)| match branch {
            Branch::Below => below,
            Branch::Above => above,
        })
    }
}

/// Split `rows` by `points[row, dimension] < threshold`.
///
/// Returns `(below, above)`; both keep the input order.
pub(crate) fn partition(
    points: ArrayView2<'_, f64>,
    rows: &[usize],
    dimension: usize,
    threshold: f64,
) -> (Vec<usize>, Vec<usize>) {
    rows.iter()
        .copied()
        .partition(|&row| Branch::of(points[[row, dimension]], threshold) == Branch::Below)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.path.is_empty() {
            "-".to_string()
        } else {
            self.path.to_string()
        };
        match self.split() {
            Some((index, threshold)) => write!(
                f,
                "{}: size={} index={}, threshold= {:6.2}",
                label, self.size, index, threshold
            ),
            None => write!(f, "{}: size={} leaf", label, self.size),
        }
    }
}
