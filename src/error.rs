//! Error types for floodgate.

use thiserror::Error;

/// Main error type for floodgate operations.
///
/// Only construction can fail. Once a mapping exists, every check yields a
/// [`Decision`](crate::ratelimit::Decision).
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid limit parameters or configuration contents
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
