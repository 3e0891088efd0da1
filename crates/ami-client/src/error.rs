//! AMI client error types.

use thiserror::Error;

/// AMI client error type.
#[derive(Error, Debug)]
pub enum AmiError {
    /// Transport error. Always retryable.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No session is currently established.
    #[error("Not connected to Asterisk")]
    NotConnected,

    /// The manager rejected our credentials. Not retryable.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session dropped while a response was pending.
    #[error("Connection closed while awaiting response")]
    ConnectionClosed,

    /// No correlated response arrived in time.
    #[error("Timed out waiting for response")]
    ResponseTimeout,

    /// The manager answered with something we cannot use.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using AmiError.
pub type AmiResult<T> = Result<T, AmiError>;
