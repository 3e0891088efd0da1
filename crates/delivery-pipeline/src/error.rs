//! Pipeline error types.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Outbox error
    #[error("Store error: {0}")]
    Store(#[from] cdr_store::StoreError),

    /// Portal error
    #[error("Portal error: {0}")]
    Portal(#[from] portal_client::PortalError),

    /// The record's country has no configured tenant
    #[error("No tenant configured for country: {0}")]
    TenantNotConfigured(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
