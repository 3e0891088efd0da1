//! Portal transport error types.

use thiserror::Error;

/// Portal transport error type.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Socket/TLS/timeout failure. Always retryable by the caller.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The portal answered with a non-200 status.
    #[error("Error on remote server, status code - {0}")]
    RemoteStatus(u16),

    /// Payload could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using PortalError.
pub type PortalResult<T> = Result<T, PortalError>;
