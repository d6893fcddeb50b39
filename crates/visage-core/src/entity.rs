//! Entities and match results

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature vector length used by the reference deployment.
pub const DEFAULT_DIM: usize = 256;

/// Longest accepted name, in UTF-8 bytes. Persisted records are bounded by
/// the same limit.
pub const MAX_NAME_LEN: usize = 64 * 1024;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Entity name must not be empty")]
    EmptyName,

    #[error("Entity name is {len} bytes, limit is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("Feature {index} is not a finite number")]
    NonFinite { index: usize },

    #[error("top_n must be > 0")]
    InvalidTopN,
}

/// A named subject with its feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub features: Vec<f64>,
}

impl Entity {
    pub fn new(name: impl Into<String>, features: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }

    /// Check the entity against a store of dimension `dim`.
    pub fn validate(&self, dim: usize) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                len: self.name.len(),
                max: MAX_NAME_LEN,
            });
        }
        validate_features(&self.features, dim)
    }
}

/// Check that `features` has exactly `dim` finite values.
pub fn validate_features(features: &[f64], dim: usize) -> Result<(), ValidationError> {
    if features.len() != dim {
        return Err(ValidationError::DimensionMismatch {
            expected: dim,
            actual: features.len(),
        });
    }
    if let Some(index) = features.iter().position(|f| !f.is_finite()) {
        return Err(ValidationError::NonFinite { index });
    }
    Ok(())
}

/// A ranked entity. Produced per query, never persisted.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub entity: Arc<Entity>,
    pub score: f64,
}
