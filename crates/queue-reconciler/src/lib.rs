//! Agent queue reconciliation against the tenant portals.
//!
//! This crate provides:
//! - StatusBarrier: complete-or-nothing collection of the QueueStatus
//!   event burst
//! - membership parsing and the availability rules
//! - QueueReconciler: the periodic refresh / dump / compare / report
//!   cycle

mod barrier;
mod member;
mod reconciler;

pub use barrier::StatusBarrier;
pub use member::{
    availability, group_memberships, parse_member_name, MembershipMap, QueueState,
};
pub use reconciler::QueueReconciler;
