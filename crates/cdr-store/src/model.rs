//! Persisted record shapes.

use call_routing::CallType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Disposition value the PBX reports for a completed, answered call.
pub const DISPOSITION_ANSWERED: &str = "ANSWERED";

/// One classified call-detail record awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// PBX-assigned identifier; the deduplication key end to end.
    pub unique_id: String,
    pub inner_number: String,
    pub opponent_number: String,
    pub caller_id: String,
    pub call_type: CallType,
    pub country: String,
    pub tenant_id: String,
    pub disposition: String,
    /// Normalized UTC start time, `%Y-%m-%d %H:%M:%S`.
    pub start_time: String,
    pub billable_seconds: i64,
    /// Raw PBX fields kept verbatim for the portal payload.
    pub extra: BTreeMap<String, String>,
}

impl CallRecord {
    pub fn is_answered(&self) -> bool {
        self.disposition == DISPOSITION_ANSWERED
    }
}

/// A recording announced to a portal once its call record is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecording {
    pub unique_id: String,
    pub file_name: String,
    pub inner_number: String,
    pub country: String,
}
