//! Error types for Slidegate.

use thiserror::Error;

/// Main error type for Slidegate operations.
#[derive(Error, Debug)]
pub enum SlidegateError {
    /// The window size is zero, negative or not a finite number
    #[error("Invalid window size: {0}")]
    InvalidWindowSize(String),

    /// The request quota is zero
    #[error("Invalid max requests: {0} (must be at least 1)")]
    InvalidMaxRequests(usize),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for SlidegateError {
    fn from(err: ::config::ConfigError) -> Self {
        SlidegateError::Config(err.to_string())
    }
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, SlidegateError>;
