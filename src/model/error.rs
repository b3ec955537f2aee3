//! Error types for the model cache

use thiserror::Error;

/// Result type for model operations
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Model cache and encoder errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid embedding dimension: {dimension}")]
    InvalidDimension { dimension: usize },

    #[error("Model load failed: {reason}")]
    LoadFailed { reason: String },
}
