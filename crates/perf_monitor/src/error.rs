//! Error types for the performance monitor.
//!
//! Tracking operations never return errors; these only surface from
//! configuration-time APIs (parsing config, registering thresholds,
//! compiling URL filters).

use thiserror::Error;

/// Errors that can occur while configuring the performance monitor.
#[derive(Debug, Error)]
pub enum PerfError {
    /// Failed to parse or serialize configuration
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold definition rejected
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// URL filter pattern failed to compile
    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex_lite::Error),
}

/// Result type for performance monitor operations.
pub type PerfResult<T> = Result<T, PerfError>;
