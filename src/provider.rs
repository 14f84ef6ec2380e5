//! Sources of per-image descriptors.
//!
//! Descriptor extraction itself happens outside this crate; a [`FeatureProvider`] hands over
//! already-computed descriptors, one row per local feature.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use tracing::{debug, info, warn};

use crate::error::{CbirError, Result};
use crate::tree::ImageId;

/// Supplies descriptors for the images of a corpus.
pub trait FeatureProvider: Sync {
    /// Handle used to address an image (a path, a key, ...).
    type ImageRef: Clone + Debug + Send + Sync;

    /// Descriptors of one image, one feature per row. May have zero rows.
    fn extract_features(&self, image: &Self::ImageRef) -> Result<Array2<f32>>;

    /// Stable identifier of an image, identical across calls.
    fn image_id(&self, image: &Self::ImageRef) -> ImageId;

    /// Every image of the corpus, in enumeration order.
    fn all_images(&self) -> Vec<Self::ImageRef>;
}

/// Parse one comma-separated descriptor line.
pub fn parse_descriptor(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .map_err(|_| CbirError::InvalidVector {
                    reason: format!("Invalid float: {}", x),
                })
        })
        .collect()
}

/// Parse a descriptor file body: one comma-separated feature per line. Blank lines and lines
/// starting with `#` are ignored.
pub fn parse_descriptors(body: &str) -> Result<Array2<f32>> {
    let mut dimension = None;
    let mut data = Vec::new();
    let mut rows = 0;
    for line in body.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = parse_descriptor(line)?;
        match dimension {
            Some(d) if d != row.len() => {
                return Err(CbirError::DimensionMismatch {
                    expected: d,
                    actual: row.len(),
                })
            }
            Some(_) => {}
            None => dimension = Some(row.len()),
        }
        data.extend(row);
        rows += 1;
    }
    Array2::from_shape_vec((rows, dimension.unwrap_or(0)), data).map_err(|e| CbirError::InvalidVector {
        reason: e.to_string(),
    })
}

/// Descriptors held in memory, keyed by image id. Enumeration follows insertion order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFeatureProvider {
    order: Vec<ImageId>,
    features: HashMap<ImageId, Array2<f32>>,
}

impl InMemoryFeatureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image's descriptors.
    pub fn insert(&mut self, id: impl Into<ImageId>, features: Array2<f32>) {
        let id = id.into();
        if self.features.insert(id.clone(), features).is_none() {
            self.order.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl FeatureProvider for InMemoryFeatureProvider {
    type ImageRef = ImageId;

    fn extract_features(&self, image: &ImageId) -> Result<Array2<f32>> {
        self.features
            .get(image)
            .cloned()
            .ok_or_else(|| CbirError::FeatureExtraction {
                image: image.clone(),
                reason: "unknown image".to_string(),
            })
    }

    fn image_id(&self, image: &ImageId) -> ImageId {
        image.clone()
    }

    fn all_images(&self) -> Vec<ImageId> {
        self.order.clone()
    }
}

/// A directory of descriptor files, one file per image. The image id is the file stem and
/// images are enumerated in file name order.
#[derive(Debug, Clone)]
pub struct DirectoryFeatureProvider {
    root: PathBuf,
    images: Vec<PathBuf>,
}

impl DirectoryFeatureProvider {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut images = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                images.push(entry.path());
            }
        }
        images.sort();
        debug!(root = %root.display(), images = images.len(), "opened descriptor directory");
        Ok(Self { root, images })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file name relative to the directory.
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FeatureProvider for DirectoryFeatureProvider {
    type ImageRef = PathBuf;

    fn extract_features(&self, image: &PathBuf) -> Result<Array2<f32>> {
        let body = fs::read_to_string(image).map_err(|e| CbirError::FeatureExtraction {
            image: image.display().to_string(),
            reason: e.to_string(),
        })?;
        parse_descriptors(&body).map_err(|e| CbirError::FeatureExtraction {
            image: image.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn image_id(&self, image: &PathBuf) -> ImageId {
        image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.display().to_string())
    }

    fn all_images(&self) -> Vec<PathBuf> {
        self.images.clone()
    }
}

/// Pool the descriptors of every image into one training matrix.
///
/// Images whose extraction fails are logged and left out.
pub fn collect_training_features<P: FeatureProvider>(provider: &P) -> Result<Array2<f32>> {
    let images = provider.all_images();
    let total = images.len();
    let start = Instant::now();
    let mut pooled: Vec<Array2<f32>> = Vec::with_capacity(total);
    for (i, image) in images.iter().enumerate() {
        match provider.extract_features(image) {
            Ok(features) if features.nrows() > 0 => pooled.push(features),
            Ok(_) => debug!(?image, "image has no descriptors"),
            Err(e) => warn!(?image, error = %e, "skipping image in training set"),
        }
        let done = i + 1;
        let avg = start.elapsed().as_secs_f64() / done as f64;
        debug!(done, total, eta_secs = avg * (total - done) as f64, "extracting features");
    }

    if let Some(first) = pooled.first() {
        let dimension = first.ncols();
        if let Some(bad) = pooled.iter().find(|f| f.ncols() != dimension) {
            return Err(CbirError::DimensionMismatch {
                expected: dimension,
                actual: bad.ncols(),
            });
        }
    }
    let views: Vec<ArrayView2<f32>> = pooled.iter().map(|f| f.view()).collect();
    if views.is_empty() {
        return Err(CbirError::EmptyTrainingSet);
    }
    let features = concatenate(Axis(0), &views).map_err(|e| CbirError::InvalidVector {
        reason: e.to_string(),
    })?;
    info!(features = features.nrows(), images = total, "features extracted");
    Ok(features)
}
