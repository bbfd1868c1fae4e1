//! Randomized median-split KD-tree
//!
//! Training: recursive binary partition of the training points.
//!   Each split node draws one column uniformly at random and splits at the
//!   median of its subset along that column.
//! Encoding: replays the stored splits on a query point set and emits
//!   `(path, ln((query_fraction + ε) / (training_fraction + ε)))` per visited
//!   node, in pre-order (self, above, below).

mod node;
mod path;

pub use node::{Node, NodeKind, SMOOTH};
pub use path::{bit_to_index, Branch, NodePath, ParsePathError, MAX_INDEXED_LEN};

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::AtomicUsize;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use node::{BuildContext, EncodeContext};

/// Errors raised while training, querying or persisting a tree
#[derive(Error, Debug)]
pub enum TreeError {
    /// Empty, ragged or non-finite training data, or an invalid configuration
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Query points do not live in the training column space
    #[error("dimension mismatch: tree was trained on {expected} columns, query has {found}")]
    DimensionMismatch {
        /// Training dimensionality
        expected: usize,
        /// Query dimensionality
        found: usize,
    },

    /// Reading or writing a tree file failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Tree file is not valid JSON for a tree
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Training parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Subsets with fewer points than this become leaves; encoding stops
    /// descending into query subsets smaller than this
    pub limit: usize,

    /// Nodes whose path is longer than this become leaves
    pub max_depth: usize,

    /// Split points shallower than this fan out onto the rayon pool
    pub parallel_depth: usize,

    /// Seed for split-dimension selection (entropy when absent)
    pub seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            max_depth: 8,
            parallel_depth: 4,
            seed: None,
        }
    }
}

impl TreeConfig {
    /// Largest `max_depth` whose leaf paths still have a level-order index
    pub const MAX_DEPTH: usize = MAX_INDEXED_LEN - 1;

    /// Configuration with explicit leaf limits
    pub fn new(limit: usize, max_depth: usize) -> Self {
        Self {
            limit,
            max_depth,
            ..Self::default()
        }
    }

    /// Fix the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the fan-out depth (0 = sequential)
    pub fn with_parallel_depth(mut self, parallel_depth: usize) -> Self {
        self.parallel_depth = parallel_depth;
        self
    }

    /// Reject configurations that cannot terminate sensibly
    pub fn validate(&self) -> Result<(), TreeError> {
        if self.limit == 0 {
            return Err(TreeError::InvalidInput(
                "limit must be at least 1".to_string(),
            ));
        }
        if self.max_depth > Self::MAX_DEPTH {
            return Err(TreeError::InvalidInput(format!(
                "max_depth {} exceeds maximum {}",
                self.max_depth,
                Self::MAX_DEPTH
            )));
        }
        Ok(())
    }
}

/// Denominator used for the query fraction while encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Denominator {
    /// Number of training points (comparable to node probabilities)
    #[default]
    TrainingSize,

    /// Number of query points (root code is always 0 for non-empty queries)
    QuerySize,
}

/// Per-call encoding options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    /// Query-size limit; the training `limit` when absent
    pub limit: Option<usize>,

    /// Query fraction denominator
    pub denominator: Denominator,
}

/// Trained KD-tree
///
/// Owns the whole partition; immutable after [`KdTree::train`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdTree {
    /// Number of training points (denominator of every node probability)
    data_size: usize,

    /// Training dimensionality
    dim: usize,

    /// Parameters used for training
    config: TreeConfig,

    /// Splits that left one child empty
    #[serde(default)]
    degenerate_splits: usize,

    root: Node,
}

impl KdTree {
    /// Train on `points` (rows = points, columns = dimensions).
    ///
    /// Uses `config.seed` when set, otherwise an entropy-seeded generator.
    pub fn train(points: ArrayView2<'_, f64>, config: &TreeConfig) -> Result<Self, TreeError> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::train_with_rng(points, config, rng)
    }

    /// Train with an explicit random source
    pub fn train_with_rng<R>(
        points: ArrayView2<'_, f64>,
        config: &TreeConfig,
        rng: R,
    ) -> Result<Self, TreeError>
    where
        R: Rng + SeedableRng + Send,
    {
        config.validate()?;
        validate_points(points)?;

        let data_size = points.nrows();
        let dim = points.ncols();
        debug!(
            rows = data_size,
            dim,
            limit = config.limit,
            max_depth = config.max_depth,
            "training kd-tree"
        );

        let degenerate = AtomicUsize::new(0);
        let ctx = BuildContext {
            points,
            data_size,
            limit: config.limit,
            max_depth: config.max_depth,
            parallel_depth: config.parallel_depth,
            degenerate_splits: &degenerate,
        };
        let root = Node::build(&ctx, (0..data_size).collect(), NodePath::root(), rng)?;

        let tree = Self {
            data_size,
            dim,
            config: *config,
            degenerate_splits: degenerate.into_inner(),
            root,
        };
        info!(
            rows = data_size,
            dim,
            nodes = tree.node_count(),
            leaves = tree.leaf_count(),
            height = tree.height(),
            degenerate = tree.degenerate_splits,
            "kd-tree trained"
        );
        Ok(tree)
    }

    /// Log-ratio code of `points` using the training `limit`
    pub fn encode(&self, points: ArrayView2<'_, f64>) -> Result<Vec<(NodePath, f64)>, TreeError> {
        self.encode_with(points, &EncodeOptions::default())
    }

    /// Log-ratio code with an explicit query-size limit
    pub fn encode_with_limit(
        &self,
        points: ArrayView2<'_, f64>,
        limit: usize,
    ) -> Result<Vec<(NodePath, f64)>, TreeError> {
        self.encode_with(
            points,
            &EncodeOptions {
                limit: Some(limit),
                ..EncodeOptions::default()
            },
        )
    }

    /// Log-ratio code with explicit options
    pub fn encode_with(
        &self,
        points: ArrayView2<'_, f64>,
        options: &EncodeOptions,
    ) -> Result<Vec<(NodePath, f64)>, TreeError> {
        if points.ncols() != self.dim {
            return Err(TreeError::DimensionMismatch {
                expected: self.dim,
                found: points.ncols(),
            });
        }
        check_finite(points)?;

        let full_data_size = match options.denominator {
            Denominator::TrainingSize => self.data_size,
            Denominator::QuerySize => points.nrows(),
        };
        let ctx = EncodeContext {
            points,
            full_data_size,
            limit: options.limit.unwrap_or(self.config.limit),
            parallel_depth: self.config.parallel_depth,
        };
        let rows: Vec<usize> = (0..points.nrows()).collect();
        Ok(self.root.encode(&ctx, &rows))
    }

    /// Breadth-first dump of the first `levels` levels
    pub fn level_dump(&self, levels: usize) -> String {
        self.root.level_dump(levels)
    }

    /// Print the first `levels` levels to stdout
    pub fn print_levels(&self, levels: usize) {
        println!("{}", self.level_dump(levels));
    }

    /// Root node
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Number of training points
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Training dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Parameters the tree was trained with
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Splits that produced an empty child
    pub fn degenerate_splits(&self) -> usize {
        self.degenerate_splits
    }

    /// Pre-order iterator (self, above, below)
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            stack: vec![&self.root],
        }
    }

    /// Total number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.nodes().filter(|node| node.is_leaf()).count()
    }

    /// Longest path length
    pub fn height(&self) -> usize {
        self.nodes().map(|node| node.path().len()).max().unwrap_or(0)
    }

    /// Node at `path`, if the tree is that deep there
    pub fn find(&self, path: &NodePath) -> Option<&Node> {
        path.bits().try_fold(&self.root, |node, bit| {
            node.child(if bit { Branch::Above } else { Branch::Below })
        })
    }

    /// Structural fingerprint; equal trees hash equal
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.data_size as u64).to_le_bytes());
        hasher.update(&(self.dim as u64).to_le_bytes());
        for node in self.nodes() {
            hasher.update(node.path().to_string().as_bytes());
            hasher.update(b"/");
            hasher.update(&(node.size() as u64).to_le_bytes());
            if let Some((dimension, threshold)) = node.split() {
                hasher.update(&(dimension as u64).to_le_bytes());
                hasher.update(&threshold.to_bits().to_le_bytes());
            }
        }
        hasher.finalize()
    }

    /// Write the tree as JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TreeError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read a tree written by [`KdTree::save_json`]
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, TreeError> {
        let reader = BufReader::new(File::open(path)?);
        let tree: KdTree = serde_json::from_reader(reader)?;
        tree.check_structure()?;
        Ok(tree)
    }

    /// Reject trees that could not have come out of training
    fn check_structure(&self) -> Result<(), TreeError> {
        let invalid = |node: &Node, reason: String| {
            TreeError::InvalidInput(format!("node '{}': {}", node.path(), reason))
        };

        if !self.root.path().is_empty() {
            return Err(invalid(&self.root, "root path is not empty".to_string()));
        }
        if self.root.size() != self.data_size {
            return Err(invalid(
                &self.root,
                format!("size {} does not match data size {}", self.root.size(), self.data_size),
            ));
        }

        for node in self.nodes() {
            if node.dim() != self.dim {
                return Err(invalid(node, format!("dim {} but tree has {}", node.dim(), self.dim)));
            }
            if node.path().len() > MAX_INDEXED_LEN {
                return Err(invalid(node, "path too long".to_string()));
            }
            let expected = if self.data_size == 0 {
                0.0
            } else {
                node.size() as f64 / self.data_size as f64
            };
            if node.probability() != expected {
                return Err(invalid(
                    node,
                    format!("probability {} but size gives {}", node.probability(), expected),
                ));
            }

            let (Some((split_dimension, threshold)), Some((below, above))) =
                (node.split(), node.children())
            else {
                continue;
            };
            if split_dimension >= self.dim {
                return Err(invalid(
                    node,
                    format!("split dimension {} out of range 0..{}", split_dimension, self.dim),
                ));
            }
            if !threshold.is_finite() {
                return Err(invalid(node, format!("non-finite threshold {}", threshold)));
            }
            if below.path() != &node.path().child(Branch::Below)
                || above.path() != &node.path().child(Branch::Above)
            {
                return Err(invalid(node, "children are not on the child paths".to_string()));
            }
            if below.size() + above.size() != node.size() {
                return Err(invalid(
                    node,
                    format!(
                        "children hold {} + {} points, node holds {}",
                        below.size(),
                        above.size(),
                        node.size()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Pre-order node iterator, see [`KdTree::nodes`]
#[derive(Debug)]
pub struct Nodes<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if let Some((below, above)) = node.children() {
            self.stack.push(below);
            self.stack.push(above);
        }
        Some(node)
    }
}

/// Stack row vectors into a point matrix, rejecting ragged input
pub fn points_from_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>, TreeError> {
    let dim = rows.first().map(Vec::len).unwrap_or(0);
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != dim) {
        return Err(TreeError::InvalidInput(format!(
            "row {} has {} columns, expected {}",
            index,
            row.len(),
            dim
        )));
    }

    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), dim), flat)
        .map_err(|err| TreeError::InvalidInput(err.to_string()))
}

fn validate_points(points: ArrayView2<'_, f64>) -> Result<(), TreeError> {
    if points.nrows() == 0 {
        return Err(TreeError::InvalidInput(
            "training matrix has no rows".to_string(),
        ));
    }
    if points.ncols() == 0 {
        return Err(TreeError::InvalidInput(
            "training matrix has no columns".to_string(),
        ));
    }
    check_finite(points)
}

fn check_finite(points: ArrayView2<'_, f64>) -> Result<(), TreeError> {
    if let Some(((row, column), value)) = points.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(TreeError::InvalidInput(format!(
            "non-finite value {} at row {}, column {}",
            value, row, column
        )));
    }
    Ok(())
}
