//! Image vectors over the vocabulary and the similarity score between them.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::distance::{dot_product, l1_norm};
use crate::error::{CbirError, Result};
use crate::inverted::VisitDelta;
use crate::tree::VocabularyTree;

/// Dense, L1-normalized visit histogram of one image, indexed by node id.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVector {
    data: Array1<f64>,
}

impl ImageVector {
    /// Wrap raw entries. No normalization is applied.
    pub fn new(data: Array1<f64>) -> Self {
        Self { data }
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.data
    }

    /// Number of entries, equal to the tree's node count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    fn l2_norm(&self) -> f64 {
        self.data.dot(&self.data).sqrt()
    }
}

/// Turns visit counts into [`ImageVector`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoder {
    /// Multiply each count by its node's idf weight before normalizing.
    pub apply_weights: bool,
}

impl Encoder {
    pub fn new(apply_weights: bool) -> Self {
        Self { apply_weights }
    }

    /// Encode an indexed image from the visits stored in the tree.
    pub fn encode(&self, tree: &VocabularyTree, image_id: &str) -> Result<ImageVector> {
        let raw: Array1<f64> = tree
            .nodes()
            .map(|node| node.visit_count(image_id) as f64)
            .collect();
        self.normalize(tree, raw, image_id)
    }

    /// Encode visits that were never merged into the tree, e.g. a transient query.
    pub fn encode_visits(&self, tree: &VocabularyTree, delta: &VisitDelta) -> Result<ImageVector> {
        let mut raw = Array1::<f64>::zeros(tree.len());
        for (&node, &count) in delta.counts() {
            let slot = raw.get_mut(node).ok_or(CbirError::NodeNotFound { id: node })?;
            *slot = count as f64;
        }
        self.normalize(tree, raw, delta.image_id())
    }

    fn normalize(&self, tree: &VocabularyTree, mut raw: Array1<f64>, image_id: &str) -> Result<ImageVector> {
        if l1_norm(raw.view()) == 0.0 {
            return Err(CbirError::UnindexedImage {
                id: image_id.to_string(),
            });
        }
        if self.apply_weights {
            for (value, node) in raw.iter_mut().zip(tree.nodes()) {
                *value *= node.weight();
            }
        }
        let norm = l1_norm(raw.view());
        if norm == 0.0 {
            return Err(CbirError::UninformativeImage {
                id: image_id.to_string(),
            });
        }
        raw.mapv_inplace(|x| x / norm);
        Ok(ImageVector::new(raw))
    }
}

/// Similarity score in `[0, 2]`; lower is more similar.
///
/// `score = 2 - 2 * <a, b>` over the vectors rescaled to unit L2 length, which equals the squared
/// Euclidean distance between them: `0` for identical histograms, `2` for disjoint support.
pub fn score(a: &ImageVector, b: &ImageVector) -> Result<f64> {
    let dot = dot_product(a.data.view(), b.data.view())?;
    let norms = a.l2_norm() * b.l2_norm();
    if norms == 0.0 {
        return Err(CbirError::InvalidVector {
            reason: "Cannot score a zero vector".to_string(),
        });
    }
    Ok((2.0 - 2.0 * dot / norms).clamp(0.0, 2.0))
}
