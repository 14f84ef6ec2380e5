//! Error types for vocabulary tree construction, indexing and retrieval

use thiserror::Error;

/// Result type alias for vocabulary tree operations
pub type Result<T> = std::result::Result<T, CbirError>;

/// Error types that can occur while building, indexing or querying a tree
#[derive(Error, Debug)]
pub enum CbirError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Invalid parameters: {reason}")]
    InvalidParams { reason: String },

    #[error("Cannot build a vocabulary tree from an empty training set")]
    EmptyTrainingSet,

    #[error("Insufficient data: {available} distinct vectors for {required} clusters")]
    InsufficientData { available: usize, required: usize },

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error("Vocabulary tree has not been built")]
    TreeNotBuilt,

    #[error("Node not found: {id}")]
    NodeNotFound { id: usize },

    #[error("Image not indexed: {id}")]
    UnindexedImage { id: String },

    #[error("Image {id} only visits nodes with zero weight")]
    UninformativeImage { id: String },

    #[error("Corpus is empty")]
    EmptyCorpus,

    #[error("Feature extraction failed for {image}: {reason}")]
    FeatureExtraction { image: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config error: {0}")]
    ConfigError(String),
}
