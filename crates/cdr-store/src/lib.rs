//! Durable storage for call records awaiting delivery.
//!
//! This crate provides:
//! - CallRecord / PendingRecording: the persisted record shapes
//! - CdrStore: SQLite-backed outbox with WAL journaling and versioned
//!   migrations
//!
//! A record is written before the raw PBX event is acknowledged and
//! deleted only after a portal confirms delivery, which is what makes
//! the pipeline at-least-once.

mod error;
mod migrations;
mod model;
mod store;

pub use call_routing::CallType;
pub use error::{StoreError, StoreResult};
pub use model::{CallRecord, PendingRecording, DISPOSITION_ANSWERED};
pub use store::CdrStore;
