//! Inverted index over tree nodes: per-image visit deltas and idf weighting.
//!
//! Visits and weights live on [`Node`](crate::tree::Node); this module owns how they are
//! accumulated and how the entropy weights are derived from them.

use std::collections::{BTreeMap, HashSet};

use ndarray::ArrayView2;
use tracing::debug;

use crate::error::{CbirError, Result};
use crate::tree::{ImageId, NodeId, RouteMode, VocabularyTree, ROOT};

/// Visit counts produced by routing one image's features, kept apart from the shared tree.
///
/// Workers build these privately; the coordinator merges them with
/// [`VocabularyTree::apply_delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitDelta {
    image_id: ImageId,
    counts: BTreeMap<NodeId, u32>,
}

impl VisitDelta {
    pub fn new(image_id: impl Into<ImageId>) -> Self {
        Self {
            image_id: image_id.into(),
            counts: BTreeMap::new(),
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Count one visit at every node of a routed path.
    pub fn record_path(&mut self, path: &[NodeId]) {
        for &node in path {
            *self.counts.entry(node).or_insert(0) += 1;
        }
    }

    /// Visit counts per node, ascending by node id.
    pub fn counts(&self) -> &BTreeMap<NodeId, u32> {
        &self.counts
    }

    pub fn count(&self, node: NodeId) -> u32 {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl VocabularyTree {
    /// Route every feature row of an image and collect the resulting visits without mutating
    /// the tree.
    pub fn propagate_features(
        &self,
        image_id: impl Into<ImageId>,
        features: ArrayView2<f32>,
        mode: RouteMode,
    ) -> Result<VisitDelta> {
        let mut delta = VisitDelta::new(image_id);
        for feature in features.outer_iter() {
            let path = self.route(feature, ROOT, mode)?;
            delta.record_path(&path);
        }
        Ok(delta)
    }

    /// Merge an image's visits into the inverted index.
    pub fn apply_delta(&mut self, delta: &VisitDelta) -> Result<()> {
        if let Some(&id) = delta.counts.keys().find(|&&id| id >= self.len()) {
            return Err(CbirError::NodeNotFound { id });
        }
        for (&node, &count) in &delta.counts {
            self.increment_visits(node, &delta.image_id, count)?;
        }
        Ok(())
    }

    /// Set `weight = ln(n_images / N_i)` on every visited node, where `N_i` is the number of
    /// distinct images that reached it. Unvisited nodes keep their weight.
    pub fn compute_weights(&mut self, n_images: usize) -> Result<()> {
        if n_images == 0 {
            return Err(CbirError::EmptyCorpus);
        }
        let n = n_images as f64;
        let weights: Vec<(NodeId, f64)> = self
            .nodes()
            .filter(|node| node.image_frequency() > 0)
            .map(|node| (node.id(), (n / node.image_frequency() as f64).ln()))
            .collect();
        debug!(visited = weights.len(), n_images, "computed node weights");
        self.assign_weights(weights)
    }

    /// Weights for one corpus: `N = corpus.len()` and `N_i` counts only corpus images that
    /// reached the node. Corpus images without visits still count towards `N`; visits left by
    /// images outside the corpus are ignored. Nodes no corpus image reached keep their weight.
    pub fn compute_corpus_weights(&mut self, corpus: &[ImageId]) -> Result<()> {
        if corpus.is_empty() {
            return Err(CbirError::EmptyCorpus);
        }
        let members: HashSet<&str> = corpus.iter().map(String::as_str).collect();
        let n = corpus.len() as f64;
        let weights: Vec<(NodeId, f64)> = self
            .nodes()
            .filter_map(|node| {
                let n_i = node
                    .visits()
                    .keys()
                    .filter(|id| members.contains(id.as_str()))
                    .count();
                (n_i > 0).then(|| (node.id(), (n / n_i as f64).ln()))
            })
            .collect();
        debug!(visited = weights.len(), n_images = corpus.len(), "computed corpus weights");
        self.assign_weights(weights)
    }

    fn assign_weights(&mut self, weights: Vec<(NodeId, f64)>) -> Result<()> {
        for (id, weight) in weights {
            self.set_weight(id, weight)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DEFAULT_WEIGHT;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// 0 -> [1, 2], 1 -> [3, 4], 2 -> [5, 6]
    fn two_level_tree() -> VocabularyTree {
        let mut tree = VocabularyTree::with_root(array![0.0f32], 2, 2);
        let a = tree.add_child(ROOT, array![-10.0f32]).unwrap();
        let b = tree.add_child(ROOT, array![10.0f32]).unwrap();
        tree.add_child(a, array![-11.0f32]).unwrap();
        tree.add_child(a, array![-9.0f32]).unwrap();
        tree.add_child(b, array![9.0f32]).unwrap();
        tree.add_child(b, array![11.0f32]).unwrap();
        tree
    }

    fn delta(image: &str, path: &[NodeId]) -> VisitDelta {
        let mut d = VisitDelta::new(image);
        d.record_path(path);
        d
    }

    #[test]
    fn test_three_image_weights() {
        let mut tree = two_level_tree();
        tree.apply_delta(&delta("a", &[0, 1, 3])).unwrap();
        tree.apply_delta(&delta("b", &[0, 1, 4])).unwrap();
        tree.apply_delta(&delta("c", &[0, 2, 5])).unwrap();
        tree.compute_weights(3).unwrap();

        assert_relative_eq!(tree.node(0).unwrap().weight(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(tree.node(1).unwrap().weight(), (1.5f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(tree.node(3).unwrap().weight(), (3.0f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(tree.node(2).unwrap().weight(), (3.0f64).ln(), epsilon = 1e-12);
        assert_eq!(tree.node(6).unwrap().weight(), DEFAULT_WEIGHT);
    }

    #[test]
    fn test_weight_uses_distinct_images_not_counts() {
        let mut tree = two_level_tree();
        let mut heavy = VisitDelta::new("a");
        for _ in 0..5 {
            heavy.record_path(&[0, 1, 3]);
        }
        tree.apply_delta(&heavy).unwrap();
        tree.apply_delta(&delta("b", &[0, 2, 5])).unwrap();
        tree.compute_corpus_weights(&["a".to_string(), "b".to_string()]).unwrap();

        assert_eq!(tree.node(1).unwrap().visit_count("a"), 5);
        assert_relative_eq!(tree.node(1).unwrap().weight(), (2.0f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_corpus_weights_count_blank_images_and_ignore_outsiders() {
        let mut tree = two_level_tree();
        tree.apply_delta(&delta("a", &[0, 1, 3])).unwrap();
        tree.apply_delta(&delta("b", &[0, 1, 4])).unwrap();
        // left behind by a query merged into the index, not part of the corpus
        tree.apply_delta(&delta("q", &[0, 2, 5])).unwrap();
        let corpus = vec!["a".to_string(), "b".to_string(), "blank".to_string()];
        tree.compute_corpus_weights(&corpus).unwrap();

        assert_relative_eq!(tree.root().weight(), (1.5f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(tree.node(1).unwrap().weight(), (1.5f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(tree.node(3).unwrap().weight(), (3.0f64).ln(), epsilon = 1e-12);
        assert_eq!(tree.node(2).unwrap().weight(), DEFAULT_WEIGHT);
        assert_eq!(tree.node(5).unwrap().weight(), DEFAULT_WEIGHT);
    }

    #[test]
    fn test_compute_weights_empty_corpus() {
        let mut tree = two_level_tree();
        assert!(matches!(tree.compute_weights(0), Err(CbirError::EmptyCorpus)));
        assert!(matches!(tree.compute_corpus_weights(&[]), Err(CbirError::EmptyCorpus)));
    }

    #[test]
    fn test_propagate_features_counts_paths() {
        let tree = two_level_tree();
        let features = array![[-10.5f32], [-8.0], [10.5]];
        let d = tree.propagate_features("img", features.view(), RouteMode::Path).unwrap();

        assert_eq!(d.image_id(), "img");
        assert_eq!(d.count(0), 3);
        assert_eq!(d.count(1), 2);
        assert_eq!(d.count(3), 1);
        assert_eq!(d.count(4), 1);
        assert_eq!(d.count(2), 1);
        assert_eq!(d.count(6), 1);
        assert_eq!(d.count(5), 0);
        // propagation alone leaves the index untouched
        assert_eq!(tree.indexed_image_count(), 0);
    }

    #[test]
    fn test_propagate_empty_features() {
        let tree = two_level_tree();
        let features = ndarray::Array2::<f32>::zeros((0, 1));
        let d = tree.propagate_features("img", features.view(), RouteMode::Path).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn test_apply_delta_accumulates() {
        let mut tree = two_level_tree();
        tree.apply_delta(&delta("a", &[0, 1, 3])).unwrap();
        tree.apply_delta(&delta("a", &[0, 1, 4])).unwrap();
        assert_eq!(tree.root().visit_count("a"), 2);
        assert_eq!(tree.node(1).unwrap().visit_count("a"), 2);
        assert_eq!(tree.node(3).unwrap().visit_count("a"), 1);
    }

    #[test]
    fn test_apply_delta_unknown_node() {
        let mut tree = two_level_tree();
        assert!(matches!(
            tree.apply_delta(&delta("a", &[0, 42])),
            Err(CbirError::NodeNotFound { id: 42 })
        ));
        assert_eq!(tree.indexed_image_count(), 0);
    }
}
