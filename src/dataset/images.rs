//! Image loading: image arrays → point matrices
//!
//! An image is a `channels × height × width` array (or `height × width` for
//! one channel). Flattening gives one point per pixel:
//!   points[y * width + x, c] = image[c, y, x]

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, ArrayViewD, Ix2, Ix3};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpzError};
use thiserror::Error;

/// Reasons an image cannot be turned into points
#[derive(Error, Debug)]
pub enum ImageLoadError {
    /// File missing or unreadable
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed `.npz` archive or array
    #[error("npz error: {0}")]
    Npz(#[from] ReadNpzError),

    /// Archive has no array with the expected key
    #[error("no array named '{0}' in archive")]
    MissingArray(String),

    /// Array is neither 2-D nor 3-D
    #[error("unsupported image shape {0:?}")]
    Shape(Vec<usize>),

    /// Image not present in an in-memory source
    #[error("unknown image '{0}'")]
    Unknown(String),
}

/// Something that can load an image by name as a point matrix
pub trait ImageSource: Sync {
    /// Load `name` and flatten it to rows = pixels, columns = channels
    fn load(&self, name: &str) -> Result<Array2<f64>, ImageLoadError>;
}

/// Directory of `.npz` files, image array stored under one key
#[derive(Debug, Clone)]
pub struct NpzImageSource {
    root: PathBuf,
    key: String,
}

impl NpzImageSource {
    /// Images under `root`, array key `x`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            key: "x".to_string(),
        }
    }

    /// Use a different array key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Directory the images are read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of all `.npz` files in the directory, sorted
    pub fn list(&self) -> Result<Vec<String>, ImageLoadError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "npz") {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ImageSource for NpzImageSource {
    fn load(&self, name: &str) -> Result<Array2<f64>, ImageLoadError> {
        let file = File::open(self.root.join(name))?;
        let mut npz = NpzReader::new(BufReader::new(file))?;

        let entry = npz
            .names()?
            .into_iter()
            .find(|entry| entry == &self.key || entry.strip_suffix(".npy") == Some(self.key.as_str()))
            .ok_or_else(|| ImageLoadError::MissingArray(self.key.clone()))?;

        let image = read_as_f64(&mut npz, &entry)?;
        pixels_to_points(image.view())
    }
}

/// Read an entry stored as `f64`, `f32` or `u8`
fn read_as_f64<R>(npz: &mut NpzReader<R>, entry: &str) -> Result<ArrayD<f64>, ImageLoadError>
where
    R: std::io::Read + std::io::Seek,
{
    let wide: Result<ArrayD<f64>, ReadNpzError> = npz.by_name(entry);
    match wide {
        Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {}
        other => return Ok(other?),
    }

    let single: Result<ArrayD<f32>, ReadNpzError> = npz.by_name(entry);
    match single {
        Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {}
        other => return Ok(other?.mapv(f64::from)),
    }

    let bytes: ArrayD<u8> = npz.by_name(entry)?;
    Ok(bytes.mapv(f64::from))
}

/// Flatten an image array to a point matrix (pixel per row)
pub fn pixels_to_points(image: ArrayViewD<'_, f64>) -> Result<Array2<f64>, ImageLoadError> {
    let shape = image.shape().to_vec();
    match shape.len() {
        3 => {
            let image = image
                .into_dimensionality::<Ix3>()
                .map_err(|_| ImageLoadError::Shape(shape.clone()))?;
            let (channels, height, width) = image.dim();
            Ok(Array2::from_shape_fn((height * width, channels), |(pixel, channel)| {
                image[[channel, pixel / width, pixel % width]]
            }))
        }
        2 => {
            let image = image
                .into_dimensionality::<Ix2>()
                .map_err(|_| ImageLoadError::Shape(shape.clone()))?;
            let (height, width) = image.dim();
            Ok(Array2::from_shape_fn((height * width, 1), |(pixel, _)| {
                image[[pixel / width, pixel % width]]
            }))
        }
        _ => Err(ImageLoadError::Shape(shape)),
    }
}

/// Images held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryImageSource {
    images: HashMap<String, Array2<f64>>,
}

impl MemoryImageSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already flattened point matrix
    pub fn insert(&mut self, name: impl Into<String>, points: Array2<f64>) {
        self.images.insert(name.into(), points);
    }
}

impl ImageSource for MemoryImageSource {
    fn load(&self, name: &str) -> Result<Array2<f64>, ImageLoadError> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| ImageLoadError::Unknown(name.to_string()))
    }
}
