//! Error types for memload

use thiserror::Error;

/// Result type alias for memload operations
pub type Result<T> = std::result::Result<T, MemloadError>;

/// Main error type for memload
#[derive(Error, Debug)]
pub enum MemloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid batch pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No store configured for device type '{0}'")]
    MissingStore(String),
}

impl MemloadError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
