//! Labeled feature matrices from per-image log-ratio codes
//!
//! For each image listed in a metadata table:
//!   load → flatten to points → tree.encode → scatter each (path, log_ratio)
//!   into column bit_to_index(path) → label in the last column.
//!
//! Width: 2^(depth + 1) code columns + 1 label column. Columns of nodes the
//! query never reached stay 0.

mod images;
mod metadata;

pub use images::{pixels_to_points, ImageLoadError, ImageSource, MemoryImageSource, NpzImageSource};
pub use metadata::{MetadataRow, MetadataTable};

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tree::{bit_to_index, EncodeOptions, KdTree, NodePath, TreeConfig, TreeError};
use crate::util::run_with_threads;

/// Errors raised while building an encoded dataset
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Image file missing or malformed
    #[error("failed to load image '{name}': {source}")]
    ImageLoad {
        /// Image name from the metadata table
        name: String,
        /// Underlying loader error
        #[source]
        source: ImageLoadError,
    },

    /// Metadata table is malformed
    #[error("invalid metadata: {0}")]
    Metadata(String),

    /// Label column not present in the metadata table
    #[error("metadata has no column '{0}'")]
    MissingColumn(String),

    /// Label value is neither boolean nor numeric
    #[error("invalid label '{value}' for '{row}'")]
    InvalidLabel {
        /// Image name of the row
        row: String,
        /// Raw label text
        value: String,
    },

    /// Row mask length does not match the matrix
    #[error("selection has {found} entries, matrix has {expected} rows")]
    SelectionLength {
        /// Matrix rows
        expected: usize,
        /// Mask entries
        found: usize,
    },

    /// Encoder configuration rejected
    #[error("invalid encoder configuration: {0}")]
    InvalidConfig(String),

    /// Training or encoding failed
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// CSV read or write failed
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// File system error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do when one image of a batch fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Fail the whole batch with the first error (in metadata order)
    #[default]
    Abort,

    /// Drop the row, record it in [`EncodedDataset::skipped`] and continue
    Skip,
}

/// Dataset encoding parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Tree levels used as features; paths longer than this are not scattered
    pub depth: usize,

    /// Metadata column holding the label
    pub label_column: String,

    /// Failure policy for individual images
    pub on_error: ErrorPolicy,

    /// Worker threads (0 = rayon global pool, 1 = sequential)
    pub n_threads: usize,

    /// Options forwarded to [`KdTree::encode_with`]
    pub encode: EncodeOptions,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            depth: 8,
            label_column: "rich".to_string(),
            on_error: ErrorPolicy::Abort,
            n_threads: 0,
            encode: EncodeOptions::default(),
        }
    }
}

impl EncoderConfig {
    /// Largest supported feature depth
    pub const MAX_DEPTH: usize = 24;

    /// Reject depths whose feature width would not fit
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.depth > Self::MAX_DEPTH {
            return Err(DatasetError::InvalidConfig(format!(
                "depth {} exceeds maximum {}",
                self.depth,
                Self::MAX_DEPTH
            )));
        }
        Ok(())
    }

    /// Number of code columns: 2^(depth + 1)
    pub fn code_width(&self) -> usize {
        1usize << (self.depth + 1)
    }
}

/// Image dropped under [`ErrorPolicy::Skip`]
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    /// Image name from the metadata table
    pub name: String,
    /// Error text
    pub reason: String,
}

/// Feature matrix plus the raw codes it was scattered from
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    features: Array2<f64>,
    codes: Vec<Vec<(NodePath, f64)>>,
    row_names: Vec<String>,
    metadata: MetadataTable,
    skipped: Vec<SkippedImage>,
}

/// Encoded row before assembly
struct EncodedRow {
    vector: Array1<f64>,
    label: f64,
    code: Vec<(NodePath, f64)>,
}

impl EncodedDataset {
    /// Encode every image of `metadata` through `tree`.
    ///
    /// Images are loaded and encoded in parallel; rows keep metadata order.
    pub fn build<S: ImageSource>(
        source: &S,
        metadata: &MetadataTable,
        tree: &KdTree,
        config: &EncoderConfig,
    ) -> Result<Self, DatasetError> {
        config.validate()?;
        let label_column = metadata.column_index(&config.label_column)?;
        let total = metadata.len();
        let done = AtomicUsize::new(0);

        let encode_one = |row: &MetadataRow| -> Result<EncodedRow, DatasetError> {
            let label = row.label(label_column)?;
            let points = source.load(&row.name).map_err(|source| DatasetError::ImageLoad {
                name: row.name.clone(),
                source,
            })?;
            let code = tree.encode_with(points.view(), &config.encode)?;
            let vector = scatter_code(&code, config.depth);

            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if finished % 10 == 0 {
                debug!(finished, total, image = %row.name, "encoded images");
            }
            Ok(EncodedRow { vector, label, code })
        };

        let results: Vec<Result<EncodedRow, DatasetError>> =
            run_with_threads(config.n_threads, |parallelism| {
                if parallelism.is_parallel() {
                    metadata.rows().par_iter().map(encode_one).collect()
                } else {
                    metadata.rows().iter().map(encode_one).collect()
                }
            })
            .map_err(|err| DatasetError::InvalidConfig(err.to_string()))?;

        let mut encoded = Vec::with_capacity(results.len());
        let mut row_names = Vec::with_capacity(results.len());
        let mut kept = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (row, result) in metadata.rows().iter().zip(results) {
            match result {
                Ok(value) => {
                    encoded.push(value);
                    row_names.push(row.name.clone());
                    kept.push(row.clone());
                }
                Err(err) if config.on_error == ErrorPolicy::Skip => {
                    warn!(image = %row.name, error = %err, "skipping image");
                    skipped.push(SkippedImage {
                        name: row.name.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let width = config.code_width();
        let mut features = Array2::zeros((encoded.len(), width + 1));
        let mut codes = Vec::with_capacity(encoded.len());
        for (mut target, row) in features.outer_iter_mut().zip(encoded) {
            target.slice_mut(s![..width]).assign(&row.vector);
            target[width] = row.label;
            codes.push(row.code);
        }

        info!(
            rows = features.nrows(),
            columns = features.ncols(),
            skipped = skipped.len(),
            "encoded dataset"
        );
        Ok(Self {
            features,
            codes,
            row_names,
            metadata: MetadataTable::new(metadata.columns().to_vec(), kept),
            skipped,
        })
    }

    /// Full matrix, label in the last column
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// Code columns only
    pub fn code_columns(&self) -> ArrayView2<'_, f64> {
        let width = self.features.ncols().saturating_sub(1);
        self.features.slice(s![.., ..width])
    }

    /// Label column
    pub fn labels(&self) -> ArrayView1<'_, f64> {
        let last = self.features.ncols().saturating_sub(1);
        self.features.column(last)
    }

    /// Raw per-row codes, aligned with the matrix rows
    pub fn codes(&self) -> &[Vec<(NodePath, f64)>] {
        &self.codes
    }

    /// Image name of each matrix row
    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    /// Metadata of the encoded rows, aligned with the matrix rows
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// Images dropped under [`ErrorPolicy::Skip`]
    pub fn skipped(&self) -> &[SkippedImage] {
        &self.skipped
    }

    /// Number of matrix rows
    pub fn rows(&self) -> usize {
        self.features.nrows()
    }

    /// Number of matrix columns (label included)
    pub fn cols(&self) -> usize {
        self.features.ncols()
    }

    /// Rows whose `mask` entry is true; the mask must cover every row
    pub fn slice(&self, mask: &[bool]) -> Result<Array2<f64>, DatasetError> {
        if mask.len() != self.rows() {
            return Err(DatasetError::SelectionLength {
                expected: self.rows(),
                found: mask.len(),
            });
        }
        let selected: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(row, &keep)| keep.then_some(row))
            .collect();
        Ok(self.features.select(Axis(0), &selected))
    }

    /// Write `name, c0..cN, label` rows as CSV
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), DatasetError> {
        let mut writer = csv::Writer::from_path(path)?;

        let width = self.cols().saturating_sub(1);
        let mut header = Vec::with_capacity(width + 2);
        header.push("name".to_string());
        header.extend((0..width).map(|column| format!("c{}", column)));
        header.push("label".to_string());
        writer.write_record(&header)?;

        for (name, row) in self.row_names.iter().zip(self.features.outer_iter()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(name.clone());
            record.extend(row.iter().map(|value| value.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Scatter a code into a `2^(depth + 1)` vector by level-order index.
///
/// Paths longer than `depth` fall outside the vector and are dropped.
pub fn scatter_code(code: &[(NodePath, f64)], depth: usize) -> Array1<f64> {
    let mut vector = Array1::zeros(1usize << (depth + 1));
    for (path, log_ratio) in code {
        if path.len() <= depth {
            vector[bit_to_index(path)] = *log_ratio;
        }
    }
    vector
}

/// Train a tree on the pixels of up to `max_images` images.
///
/// When more names are given, `max_images` of them are sampled without
/// replacement using `rng`. All sampled images are stacked into one point
/// matrix; any load failure aborts training.
pub fn train_from_images<S, R>(
    source: &S,
    names: &[String],
    config: &TreeConfig,
    max_images: usize,
    rng: &mut R,
) -> Result<KdTree, DatasetError>
where
    S: ImageSource,
    R: Rng + ?Sized,
{
    let selected: Vec<&String> = if names.len() <= max_images {
        names.iter().collect()
    } else {
        rand::seq::index::sample(rng, names.len(), max_images)
            .into_iter()
            .map(|index| &names[index])
            .collect()
    };
    info!(images = selected.len(), "training kd-tree from images");

    let images = selected
        .par_iter()
        .map(|name| {
            source.load(name).map_err(|source| DatasetError::ImageLoad {
                name: name.to_string(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let views: Vec<ArrayView2<'_, f64>> = images.iter().map(|image| image.view()).collect();
    if views.is_empty() {
        return Err(TreeError::InvalidInput("no training images".to_string()).into());
    }
    let points = concatenate(Axis(0), &views)
        .map_err(|err| TreeError::InvalidInput(format!("images disagree on channels: {}", err)))?;
    debug!(rows = points.nrows(), dim = points.ncols(), "stacked training points");

    Ok(KdTree::train(points.view(), config)?)
}
