//! # vocabtree
//!
//! Content-based image retrieval with a hierarchical vocabulary tree.
//!
//! This library provides:
//! - Recursive construction of a vocabulary tree by mini-batch k-means
//! - Greedy propagation of image descriptors down the tree
//! - An inverted index over tree nodes with entropy (idf) weights
//! - Image encoding and similarity ranking
//!
//! Descriptor extraction is left to a [`FeatureProvider`].
//!
//! ## Example
//!
//! ```rust
//! use ndarray::array;
//! use vocabtree::{Cbir, CbirConfig, InMemoryFeatureProvider};
//!
//! let mut provider = InMemoryFeatureProvider::new();
//! provider.insert("beach", array![[0.0f32, 0.1], [0.2, 0.0], [0.1, 0.1]]);
//! provider.insert("forest", array![[5.0f32, 5.1], [5.2, 4.9], [4.8, 5.0]]);
//!
//! let mut config = CbirConfig::new(2, 2);
//! config.kmeans.seed = Some(42);
//! let (mut cbir, report) = Cbir::initialise(provider, config).unwrap();
//! assert!(report.is_complete());
//!
//! let results = cbir.retrieve(&"beach".to_string(), Some(1)).unwrap();
//! assert_eq!(results[0].image_id, "beach");
//! ```

pub mod builder;
pub mod cbir;
pub mod clustering;
pub mod config;
pub mod distance;
pub mod encoder;
pub mod error;
pub mod indexer;
pub mod inverted;
pub mod metrics;
pub mod provider;
pub mod retriever;
pub mod tree;

pub use builder::{build_tree, TreeBuilder, TreeParams};
pub use cbir::Cbir;
pub use clustering::{
    Clustering, ClusteringOracle, InitializationMethod, KMeansParams, MiniBatchKMeans,
};
pub use config::CbirConfig;
pub use encoder::{score, Encoder, ImageVector};
pub use error::{CbirError, Result};
pub use indexer::{index_corpus, CancelToken, IndexReport, Indexer, PropagationFailure};
pub use inverted::VisitDelta;
pub use metrics::MetricsCollector;
pub use provider::{
    collect_training_features, DirectoryFeatureProvider, FeatureProvider, InMemoryFeatureProvider,
};
pub use retriever::{retrieve, score_images, QueryMode, RetrievalResult, Retriever};
pub use tree::{ImageId, Node, NodeId, RouteMode, VocabularyTree, ROOT};
