//! Call direction classification.
//!
//! A channel identifier like `SIP/1234-00000a1b` embeds the inner
//! extension; which side of the call matches the pattern decides the
//! direction. The tie-break when both legs match different extensions
//! follows whichever leg is consistent with a populated opponent field.

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder opponent for calls that arrive with no caller identity.
pub const HIDDEN_OPPONENT: &str = "xxxx";

/// Shortest destination accepted as a plausible external number.
const MIN_EXTERNAL_LEN: usize = 4;

/// Typed call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CallType {
    Incoming,
    Outgoing,
    /// Both legs are the same extension; never persisted.
    Inner,
    /// Incoming with no caller identity at all.
    IncomingHidden,
    /// Unclassifiable; never persisted.
    Unknown,
}

impl CallType {
    /// Wire code the portals expect.
    pub fn code(self) -> i64 {
        match self {
            CallType::Incoming => 0,
            CallType::Outgoing => 1,
            CallType::Inner => 2,
            CallType::IncomingHidden => 4,
            CallType::Unknown => -1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => CallType::Incoming,
            1 => CallType::Outgoing,
            2 => CallType::Inner,
            4 => CallType::IncomingHidden,
            _ => CallType::Unknown,
        }
    }

    /// Only these types are ever persisted to the outbox.
    pub fn is_deliverable(self) -> bool {
        !matches!(self, CallType::Inner | CallType::Unknown)
    }
}

/// Result of classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub inner: String,
    pub opponent: String,
    pub call_type: CallType,
}

impl Classification {
    fn new(inner: &str, opponent: &str, call_type: CallType) -> Self {
        Self {
            inner: inner.to_string(),
            opponent: opponent.to_string(),
            call_type,
        }
    }

    fn discard(call_type: CallType) -> Self {
        Self::new("", "", call_type)
    }
}

pub(crate) fn channel_extension(channel: &str) -> Option<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^\w+/(\d{2,4}|\d{4}\w{2})\D*-.+$").expect("static channel pattern")
    });
    re.captures(channel).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn hidden(source: &str, caller_id: &str) -> bool {
    source.is_empty() && caller_id.is_empty()
}

fn plausible_external(destination: &str) -> bool {
    destination.len() >= MIN_EXTERNAL_LEN
}

/// Classify one raw call-detail event into direction and number pair.
pub fn classify(
    channel: &str,
    destination_channel: &str,
    source: &str,
    destination: &str,
    caller_id: &str,
) -> Classification {
    let originating = channel_extension(channel);
    let terminating = channel_extension(destination_channel);

    match (originating, terminating) {
        (Some(from_ext), Some(to_ext)) => {
            if from_ext == to_ext {
                // Same extension on both legs: internal loop, dropped.
                return Classification::discard(CallType::Inner);
            }
            // Two different extensions: trust whichever leg agrees with
            // a populated opponent field.
            if plausible_external(destination) {
                Classification::new(from_ext, destination, CallType::Outgoing)
            } else if !source.is_empty() {
                Classification::new(to_ext, source, CallType::Incoming)
            } else {
                Classification::discard(CallType::Unknown)
            }
        }
        (Some(from_ext), None) => {
            if plausible_external(destination) {
                Classification::new(from_ext, destination, CallType::Outgoing)
            } else if hidden(source, caller_id) {
                Classification::new(from_ext, HIDDEN_OPPONENT, CallType::IncomingHidden)
            } else {
                Classification::new(from_ext, source, CallType::Incoming)
            }
        }
        (None, Some(to_ext)) => {
            if hidden(source, caller_id) {
                Classification::new(to_ext, HIDDEN_OPPONENT, CallType::IncomingHidden)
            } else {
                Classification::new(to_ext, source, CallType::Incoming)
            }
        }
        // High chances this is just a dropped phone; ignore.
        (None, None) => Classification::discard(CallType::Unknown),
    }
}
