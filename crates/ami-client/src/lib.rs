//! Asterisk Manager Interface (AMI) client.
//!
//! This crate provides:
//! - AmiFrame: the text-framed key/value wire unit
//! - AmiClient: persistent session with request/response correlation and
//!   an event handler registry
//! - actions: the manager actions the gateway uses
//! - run_supervisor: the reconnect loop that owns the session for the
//!   lifetime of the process
//!
//! # Handler contract
//!
//! Event handlers run inline on the protocol read loop. A handler that
//! blocks stalls all protocol I/O, including pending request/response
//! correlation. Handlers must only do bounded work — typically a
//! bounded channel `try_send` — and hand anything longer to another task.

pub mod actions;
mod client;
mod error;
mod frame;
mod supervisor;

pub use client::{AmiClient, ConnectSettings, EVENT_MASK};
pub use error::{AmiError, AmiResult};
pub use frame::AmiFrame;
pub use supervisor::{backoff_delay, run_supervisor, AlertGate, SupervisorConfig};
