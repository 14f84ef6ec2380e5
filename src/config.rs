//! Configuration for building, indexing and querying.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::builder::TreeParams;
use crate::clustering::KMeansParams;
use crate::encoder::Encoder;
use crate::error::{CbirError, Result};
use crate::retriever::QueryMode;
use crate::tree::RouteMode;

/// All tunables of a [`Cbir`](crate::cbir::Cbir) engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CbirConfig {
    pub tree: TreeParams,
    pub kmeans: KMeansParams,
    pub route_mode: RouteMode,
    /// Multiply visit counts by node weights when encoding.
    pub apply_weights: bool,
    pub query_mode: QueryMode,
}

impl Default for CbirConfig {
    fn default() -> Self {
        Self {
            tree: TreeParams::default(),
            kmeans: KMeansParams::default(),
            route_mode: RouteMode::Path,
            apply_weights: false,
            query_mode: QueryMode::Transient,
        }
    }
}

impl CbirConfig {
    pub fn new(n_branches: usize, depth: usize) -> Self {
        Self {
            tree: TreeParams::new(n_branches, depth),
            ..Self::default()
        }
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| CbirError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CbirError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        if self.kmeans.batch_size == 0 {
            return Err(CbirError::InvalidParams {
                reason: "kmeans batch_size must be greater than 0".to_string(),
            });
        }
        if self.kmeans.epsilon.is_nan() || self.kmeans.epsilon < 0.0 {
            return Err(CbirError::InvalidParams {
                reason: "kmeans epsilon must be non-negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn encoder(&self) -> Encoder {
        Encoder::new(self.apply_weights)
    }
}
