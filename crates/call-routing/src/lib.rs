//! Call classification and inner-number routing.
//!
//! This crate provides:
//! - classify: channel fields -> (inner number, opponent number, call type)
//! - NumberRegistry: refreshed mapping of inner numbers to tenants,
//!   with a duplicate-number side table
//! - CallbackCache: pairing of two-leg call-back flows
//! - number validation, country inference and start-time normalization

mod callback;
mod classify;
mod numbers;
mod registry;

pub use callback::CallbackCache;
pub use classify::{classify, CallType, Classification, HIDDEN_OPPONENT};
pub use numbers::{normalize_start_time, resolve_country_by_prefix, validate_numbers};
pub use registry::{
    build_snapshot, NumberRegistry, RegistrySnapshot, Resolution, TenantRoster,
};
