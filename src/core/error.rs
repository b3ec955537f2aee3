//! Error types for the CourseBot execution core

use thiserror::Error;

use crate::core::config::ConfigError;
use crate::executor::ExecError;
use crate::logging::LoggingError;
use crate::model::ModelError;

/// Result type alias for execution-core operations
pub type Result<T> = std::result::Result<T, CoursebotError>;

/// Top-level error for the execution core.
///
/// Worker computation failures never appear here as panics; they arrive as
/// structured [`ExecError`] values produced on the other side of the
/// process boundary.
#[derive(Error, Debug)]
pub enum CoursebotError {
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
