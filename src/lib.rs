//! # Randomized KD-tree log-ratio encoding
//!
//! Learns a hierarchical partition of a point cloud (pixel vectors stacked
//! from many images) and turns any new point set into a fixed-length
//! density-ratio code.
//!
//! ## Core Algorithm
//!
//! 1. **Training**: recursive binary split; each split node picks a column
//!    uniformly at random and splits its subset at the median
//!    (`< threshold` below, `>= threshold` above)
//! 2. **Bookkeeping**: every node stores `probability = size / data_size`
//! 3. **Encoding**: replay the stored splits on a query set and emit
//!    `ln((query_fraction + ε) / (probability + ε))` for each visited node
//! 4. **Features**: scatter codes into a `2^(depth+1)`-wide row by
//!    level-order path index, label in the last column
//!
//! ## Usage Example
//!
//! ```
//! use kdcode::{KdTree, TreeConfig};
//! use ndarray::Array2;
//!
//! let points = Array2::from_shape_fn((256, 3), |(row, col)| ((row * 31 + col * 7) % 97) as f64);
//! let tree = KdTree::train(points.view(), &TreeConfig::new(16, 4).with_seed(42))?;
//! let code = tree.encode(points.view())?;
//!
//! // Encoding the training set itself reproduces the root probability.
//! assert!(code[0].0.is_empty());
//! assert!(code[0].1.abs() < 1e-12);
//! # Ok::<(), kdcode::TreeError>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod tree;       // Tree, nodes, paths
pub mod dataset;    // Image batches → feature matrices
pub mod util;       // Median selection, density, threading

// Re-exports for convenience
pub use tree::{
    bit_to_index, Branch, Denominator, EncodeOptions, KdTree, Node, NodeKind, NodePath,
    TreeConfig, TreeError,
};
pub use dataset::{
    train_from_images, DatasetError, EncodedDataset, EncoderConfig, ErrorPolicy, ImageSource,
    MetadataTable, NpzImageSource,
};
