//! Error types for ratewarden.

use thiserror::Error;

/// Main error type for ratewarden operations.
///
/// Only construction and I/O can fail. A denied request is a normal
/// [`Decision`](crate::ratelimit::Decision), never an error.
#[derive(Error, Debug)]
pub enum RateWardenError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured algorithm name is not recognized
    #[error("Unknown rate limiting algorithm: {0:?} (expected \"tokenbucket\" or \"slidingwindow\")")]
    UnknownAlgorithm(String),

    /// A limiter parameter is out of range
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// The offending setting
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for RateWardenError {
    fn from(err: config::ConfigError) -> Self {
        RateWardenError::Config(err.to_string())
    }
}

/// Result type alias for ratewarden operations.
pub type Result<T> = std::result::Result<T, RateWardenError>;
