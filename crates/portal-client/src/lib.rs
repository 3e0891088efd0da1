//! HMAC-signed transport to the tenant portals.
//!
//! Every request body is signed with the tenant's shared secret and
//! wrapped in a `{Data, CompanyId}` envelope. This layer performs one
//! HTTP call with a fixed timeout and classifies transport errors
//! versus remote-status errors; retry policy belongs to the callers.

mod error;
mod sign;
mod transport;

pub use error::{PortalError, PortalResult};
pub use sign::{sign, verify};
pub use transport::{PortalClient, PortalMethod, SignedEnvelope};
