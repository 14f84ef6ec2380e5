//! Vocabulary tree arena: nodes, topology and greedy routing.

use std::collections::HashMap;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::distance::euclidean_distance;
use crate::error::{CbirError, Result};

/// Node id, unique across the whole tree. The root is always `0`.
pub type NodeId = usize;

/// Stable identifier of an indexed image.
pub type ImageId = String;

/// Id of the root node.
pub const ROOT: NodeId = 0;

/// Default idf weight of a node that no image has visited.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Which nodes a routed feature leaves a visit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Only the nodes on the greedy path, from the start node down to the leaf.
    #[default]
    Path,
    /// The start node plus every child inspected at each level, selected or not.
    Inspected,
}

/// A visual word: a cluster center plus the inverted-file entries of the images that reached it.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    centroid: Array1<f32>,
    depth: usize,
    children: Vec<NodeId>,
    visits: HashMap<ImageId, u32>,
    weight: f64,
}

impl Node {
    fn new(id: NodeId, centroid: Array1<f32>, depth: usize) -> Self {
        Self {
            id,
            centroid,
            depth,
            children: Vec::new(),
            visits: HashMap::new(),
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn centroid(&self) -> ArrayView1<f32> {
        self.centroid.view()
    }

    /// Distance in edges from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Visit count per image. Absent images have zero visits.
    pub fn visits(&self) -> &HashMap<ImageId, u32> {
        &self.visits
    }

    /// Visit count of a single image, 0 if it never reached this node.
    pub fn visit_count(&self, image_id: &str) -> u32 {
        self.visits.get(image_id).copied().unwrap_or(0)
    }

    /// Number of distinct images that reached this node.
    pub fn image_frequency(&self) -> usize {
        self.visits.len()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// A rooted tree of cluster centers stored as an arena indexed by [`NodeId`].
///
/// Ids are handed out in creation order, so `nodes[id].id == id` and the ids always form the
/// contiguous range `[0, len)`. Topology is fixed once the builder returns; only the inverted
/// index (visits and weights) changes afterwards.
#[derive(Debug, Clone)]
pub struct VocabularyTree {
    nodes: Vec<Node>,
    n_branches: usize,
    max_depth: usize,
}

impl VocabularyTree {
    pub(crate) fn with_root(root_centroid: Array1<f32>, n_branches: usize, max_depth: usize) -> Self {
        Self {
            nodes: vec![Node::new(ROOT, root_centroid, 0)],
            n_branches,
            max_depth,
        }
    }

    /// Allocate the next id for a new child of `parent` and link it.
    pub(crate) fn add_child(&mut self, parent: NodeId, centroid: Array1<f32>) -> Result<NodeId> {
        let depth = self.node(parent)?.depth + 1;
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, centroid, depth));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has at least a root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn n_branches(&self) -> usize {
        self.n_branches
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Dimension of the feature vectors this tree quantizes.
    pub fn dimension(&self) -> usize {
        self.nodes[ROOT].centroid.len()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(CbirError::NodeNotFound { id })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(CbirError::NodeNotFound { id })
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Push `feature` down the tree from `start` by greedy nearest-centroid descent.
    ///
    /// At each level the child with the strictly smallest Euclidean distance wins, so ties go to
    /// the earliest child. The returned ids always begin with `start` and end with a leaf in
    /// [`RouteMode::Path`]; in [`RouteMode::Inspected`] every scanned child is included.
    pub fn route(&self, feature: ArrayView1<f32>, start: NodeId, mode: RouteMode) -> Result<Vec<NodeId>> {
        if feature.len() != self.dimension() {
            return Err(CbirError::DimensionMismatch {
                expected: self.dimension(),
                actual: feature.len(),
            });
        }
        if feature.iter().any(|x| !x.is_finite()) {
            return Err(CbirError::InvalidVector {
                reason: "feature contains non-finite values".to_string(),
            });
        }

        let mut current = self.node(start)?;
        let mut path = vec![start];
        while let Some(&first) = current.children.first() {
            let mut best = first;
            let mut min_dist = f32::INFINITY;
            for &child in &current.children {
                let dist = euclidean_distance(feature, self.nodes[child].centroid.view());
                if dist < min_dist {
                    min_dist = dist;
                    best = child;
                }
                if mode == RouteMode::Inspected {
                    path.push(child);
                }
            }
            if mode == RouteMode::Path {
                path.push(best);
            }
            current = &self.nodes[best];
        }
        Ok(path)
    }

    /// Ids of the nodes `image_id` has visited, ascending.
    pub fn visited_nodes(&self, image_id: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.visits.contains_key(image_id))
            .map(|n| n.id)
            .collect()
    }

    /// Ids of every image recorded in the index. Each indexed feature passes the root, so this is
    /// the set of images with at least one routed feature.
    pub fn indexed_images(&self) -> impl Iterator<Item = &ImageId> {
        self.nodes[ROOT].visits.keys()
    }

    pub fn indexed_image_count(&self) -> usize {
        self.nodes[ROOT].visits.len()
    }

    /// Drop every visit and restore default weights, leaving the topology intact.
    pub fn reset_index(&mut self) {
        for node in &mut self.nodes {
            node.visits.clear();
            node.weight = DEFAULT_WEIGHT;
        }
    }

    pub(crate) fn increment_visits(&mut self, id: NodeId, image_id: &str, count: u32) -> Result<()> {
        let node = self.node_mut(id)?;
        match node.visits.get_mut(image_id) {
            Some(c) => *c += count,
            None => {
                node.visits.insert(image_id.to_string(), count);
            }
        }
        Ok(())
    }

    pub(crate) fn set_weight(&mut self, id: NodeId, weight: f64) -> Result<()> {
        self.node_mut(id)?.weight = weight;
        Ok(())
    }
}
