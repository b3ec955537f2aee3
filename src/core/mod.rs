//! CourseBot Core Module
//!
//! This module contains the shared foundation for the execution core:
//! - Configuration loaded from the environment at startup
//! - Crate-wide error types

pub mod config;
pub mod error;

// Re-export commonly used items
pub use self::config::*;
pub use self::error::{CoursebotError, Result};
