//! Pairing of two-leg call-back flows.
//!
//! A portal-initiated call-back produces two raw call-detail events
//! that share a channel-group key, each exposing only one side of the
//! real inner/opponent pairing. The first leg's number is cached under
//! the group key until the second leg arrives; entries that never pair
//! are evicted by TTL.

use crate::{CallType, Classification};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One remembered leg.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Leg {
    Inner(String),
    Outer(String),
}

/// Cache of unpaired call-back legs, keyed by channel-group id.
pub struct CallbackCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Leg, Instant)>>,
}

impl CallbackCache {
    /// Default eviction window for a leg that never pairs.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Classify one call-back leg.
    ///
    /// The group key is the channel identifier up to its trailing
    /// sequence suffix. When the counterpart leg is already cached the
    /// completed pair is returned as an Outgoing record and the entry
    /// evicted; otherwise the leg is remembered and Unknown returned.
    pub fn classify_leg(
        &self,
        channel: &str,
        destination_channel: &str,
        destination: &str,
    ) -> Classification {
        let group = group_key(channel);
        let leg = observe_leg(destination_channel, destination);

        let Some(leg) = leg else {
            return Classification {
                inner: String::new(),
                opponent: String::new(),
                call_type: CallType::Unknown,
            };
        };

        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, (_, seen)| now.duration_since(*seen) < self.ttl);

        match entries.remove(&group) {
            Some((Leg::Inner(inner), _)) => {
                if let Leg::Outer(outer) = leg {
                    return Classification {
                        inner,
                        opponent: outer,
                        call_type: CallType::Outgoing,
                    };
                }
                // Two inner legs under one group: keep the newest.
                entries.insert(group, (leg, now));
            }
            Some((Leg::Outer(outer), _)) => {
                if let Leg::Inner(inner) = leg {
                    return Classification {
                        inner,
                        opponent: outer,
                        call_type: CallType::Outgoing,
                    };
                }
                entries.insert(group, (leg, now));
            }
            None => {
                entries.insert(group, (leg, now));
            }
        }

        Classification {
            inner: String::new(),
            opponent: String::new(),
            call_type: CallType::Unknown,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

/// Channel identifier minus the `;N` leg suffix: both legs of one
/// local channel pair share everything before it.
fn group_key(channel: &str) -> String {
    match channel.rfind(';') {
        Some(idx) => channel[..idx].to_string(),
        None => channel.to_string(),
    }
}

/// Which side of the pairing this raw event exposes.
fn observe_leg(destination_channel: &str, destination: &str) -> Option<Leg> {
    if let Some(ext) = crate::classify::channel_extension(destination_channel) {
        return Some(Leg::Inner(ext.to_string()));
    }
    if destination.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
        return Some(Leg::Outer(destination.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_inner_then_outer() {
        let cache = CallbackCache::default();

        // First leg: the manager's extension answered.
        let first = cache.classify_leg("Local/777@test-0001;1", "SIP/1007-ab", "");
        assert_eq!(first.call_type, CallType::Unknown);
        assert_eq!(cache.len(), 1);

        // Second leg: the client's number, same channel group.
        let second = cache.classify_leg("Local/777@test-0001;2", "SIP/trunk-cd", "0501234567");
        assert_eq!(second.call_type, CallType::Outgoing);
        assert_eq!(second.inner, "1007");
        assert_eq!(second.opponent, "0501234567");
        assert!(cache.is_empty());
    }

    #[test]
    fn pairs_outer_then_inner() {
        let cache = CallbackCache::default();
        cache.classify_leg("Local/777@test-0002;1", "SIP/trunk-cd", "0671112233");
        let done = cache.classify_leg("Local/777@test-0002;2", "SIP/2008-ab", "");
        assert_eq!(done.call_type, CallType::Outgoing);
        assert_eq!(done.inner, "2008");
        assert_eq!(done.opponent, "0671112233");
    }

    #[test]
    fn different_groups_do_not_pair() {
        let cache = CallbackCache::default();
        cache.classify_leg("Local/777@test-0003;1", "SIP/1007-ab", "");
        let other = cache.classify_leg("Local/777@test-0004;1", "SIP/trunk-cd", "0501234567");
        assert_eq!(other.call_type, CallType::Unknown);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_legs_are_evicted() {
        let cache = CallbackCache::new(Duration::ZERO);
        cache.classify_leg("Local/777@test-0005;1", "SIP/1007-ab", "");
        // TTL of zero: the first leg is gone by the time the second
        // arrives, so no pairing happens.
        let second = cache.classify_leg("Local/777@test-0005;2", "SIP/trunk-cd", "0501234567");
        assert_eq!(second.call_type, CallType::Unknown);
    }

    #[test]
    fn useless_leg_is_not_cached() {
        let cache = CallbackCache::default();
        let c = cache.classify_leg("Local/777@test-0006;1", "SIP/trunk-cd", "12");
        assert_eq!(c.call_type, CallType::Unknown);
        assert!(cache.is_empty());
    }
}
