//! Configuration error types.

use thiserror::Error;

/// Configuration error type.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semantically invalid configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
