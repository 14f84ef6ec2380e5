//! Recursive construction of a vocabulary tree by hierarchical clustering.

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clustering::{ClusteringOracle, KMeansParams, MiniBatchKMeans};
use crate::distance::mean_vector;
use crate::error::{CbirError, Result};
use crate::tree::{NodeId, VocabularyTree, ROOT};

/// Shape parameters of a vocabulary tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Branching factor `k`: number of children of every internal node.
    pub n_branches: usize,
    /// Maximum depth of a leaf; the root sits at depth 0.
    pub depth: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            n_branches: 10,
            depth: 6,
        }
    }
}

impl TreeParams {
    pub fn new(n_branches: usize, depth: usize) -> Self {
        Self { n_branches, depth }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_branches < 2 {
            return Err(CbirError::InvalidParams {
                reason: format!("n_branches must be at least 2, got {}", self.n_branches),
            });
        }
        if self.depth < 1 {
            return Err(CbirError::InvalidParams {
                reason: "depth must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Node count of a complete tree with these parameters, saturating at `usize::MAX`.
    pub fn max_nodes(&self) -> usize {
        let mut total = 0usize;
        let mut level = 1usize;
        for _ in 0..=self.depth {
            total = total.saturating_add(level);
            level = level.saturating_mul(self.n_branches);
        }
        total
    }
}

/// Builds a [`VocabularyTree`] by recursively splitting the training set with a
/// [`ClusteringOracle`].
///
/// Child ids come from the tree arena in creation order: each child takes the next id the moment
/// it is created, and its whole subtree is built before its next sibling is created.
#[derive(Debug)]
pub struct TreeBuilder<C: ClusteringOracle> {
    params: TreeParams,
    oracle: C,
}

impl TreeBuilder<MiniBatchKMeans> {
    /// Builder backed by mini-batch k-means.
    pub fn with_kmeans(params: TreeParams, kmeans: KMeansParams) -> Self {
        Self::new(params, MiniBatchKMeans::new(kmeans))
    }
}

impl<C: ClusteringOracle> TreeBuilder<C> {
    pub fn new(params: TreeParams, oracle: C) -> Self {
        Self { params, oracle }
    }

    pub fn params(&self) -> TreeParams {
        self.params
    }

    /// Build a tree from the pooled training descriptors, one per row.
    pub fn fit(&mut self, features: ArrayView2<f32>) -> Result<VocabularyTree> {
        self.params.validate()?;
        if features.nrows() == 0 {
            return Err(CbirError::EmptyTrainingSet);
        }

        info!(
            features = features.nrows(),
            dimension = features.ncols(),
            n_branches = self.params.n_branches,
            depth = self.params.depth,
            "building vocabulary tree"
        );
        let mut tree = VocabularyTree::with_root(
            mean_vector(features)?,
            self.params.n_branches,
            self.params.depth,
        );
        self.grow(&mut tree, ROOT, features, 0)?;
        info!(
            nodes = tree.len(),
            leaves = tree.leaves().count(),
            "vocabulary tree built"
        );
        Ok(tree)
    }

    fn grow(
        &mut self,
        tree: &mut VocabularyTree,
        node: NodeId,
        features: ArrayView2<f32>,
        depth: usize,
    ) -> Result<()> {
        let k = self.params.n_branches;
        if depth >= self.params.depth || features.nrows() < k {
            return Ok(());
        }

        debug!(
            node,
            depth,
            features = features.nrows(),
            allocated = tree.len(),
            "computing clusters"
        );
        let clustering = match self.oracle.cluster(features, k) {
            Ok(c) => c,
            Err(CbirError::InsufficientData { available, required }) => {
                debug!(node, available, required, "insufficient data, keeping node as leaf");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if clustering.k() != k
            || clustering.centroids.ncols() != features.ncols()
            || clustering.assignments.len() != features.nrows()
            || clustering.assignments.iter().any(|&c| c >= k)
        {
            return Err(CbirError::Clustering(format!(
                "oracle returned a malformed clustering for node {node}"
            )));
        }

        for (cluster, members) in clustering.groups().into_iter().enumerate() {
            let centroid: Array1<f32> = clustering.centroids.row(cluster).to_owned();
            let child = tree.add_child(node, centroid)?;
            let subset = features.select(Axis(0), &members);
            self.grow(tree, child, subset.view(), depth + 1)?;
        }
        Ok(())
    }
}

/// Build a tree with default mini-batch k-means settings.
pub fn build_tree(features: ArrayView2<f32>, n_branches: usize, depth: usize) -> Result<VocabularyTree> {
    TreeBuilder::with_kmeans(TreeParams::new(n_branches, depth), KMeansParams::default()).fit(features)
}
