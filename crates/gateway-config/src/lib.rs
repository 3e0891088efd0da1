//! Configuration, logging and alerting for the PBX gateway.
//!
//! This crate provides:
//! - Config: JSON configuration file with env overrides
//! - init_logging: tracing subscriber setup
//! - Alerter: the single `alert(message)` capability used for emergencies

mod alert;
mod config;
mod error;
mod logging;

pub use alert::{Alert, Alerter};
pub use config::{
    AmiSettings, Config, DeliverySettings, IntervalSettings, Tenant, DEFAULT_LOG_LEVEL,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
