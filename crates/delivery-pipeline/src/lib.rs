//! At-least-once delivery of call records to the tenant portals.
//!
//! This crate provides:
//! - CdrSink: the delivery seam (PortalSink in production)
//! - DeliveryPipeline: timer-driven outbox reader plus sender pool
//!
//! Records are deleted from the outbox only after the sink confirms
//! delivery; everything else is retried on the next tick.

mod error;
mod pipeline;
mod sink;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::DeliveryPipeline;
pub use sink::{CdrSink, PortalSink};
