//! Queue member naming and availability rules.

use std::collections::{BTreeSet, HashMap};

use ami_client::AmiFrame;

/// Reported state of one inner number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Member of its static queue (or the generalized one).
    Available,
    /// Present in the dump but not where it should be.
    NotAvailable,
    /// Absent from the membership dump entirely.
    NotInQueue,
}

impl QueueState {
    /// Wire value for `save_company_queues_states`.
    pub fn as_str(self) -> &'static str {
        match self {
            QueueState::Available => "available",
            QueueState::NotAvailable => "not_available",
            QueueState::NotInQueue => "not_in_queue",
        }
    }
}

/// Split a member name like `SIP/6916ua` into number and country.
/// Names that do not follow the provisioning convention belong to
/// peers outside the gateway's scope.
pub fn parse_member_name(name: &str) -> Option<(String, String)> {
    let (_, peer) = name.split_once('/')?;
    // Byte-wise checks keep the slicing below on char boundaries even
    // for names with multi-byte characters.
    let bytes = peer.as_bytes();
    if bytes.len() < 6
        || !bytes[..4].iter().all(u8::is_ascii_digit)
        || !bytes[4..6].iter().all(u8::is_ascii_lowercase)
    {
        return None;
    }
    Some((peer[..4].to_string(), peer[4..6].to_string()))
}

/// Membership dump grouped per (number, country).
pub type MembershipMap = HashMap<(String, String), BTreeSet<String>>;

/// Fold a drained burst into per-number queue sets.
pub fn group_memberships(frames: &[AmiFrame]) -> MembershipMap {
    let mut map = MembershipMap::new();
    for frame in frames {
        let queue = frame.get_or_empty("Queue");
        let name = frame.get_or_empty("Name");
        if queue.is_empty() {
            continue;
        }
        if let Some(key) = parse_member_name(name) {
            map.entry(key).or_default().insert(queue.to_string());
        }
    }
    map
}

/// A number is available when its active set contains the static queue
/// or the generalized one (static minus the trailing digit). Every
/// other membership is a stray to be removed.
pub fn availability(static_queue: &str, active: &BTreeSet<String>) -> (QueueState, Vec<String>) {
    let generalized: &str = if static_queue
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit())
    {
        &static_queue[..static_queue.len() - 1]
    } else {
        static_queue
    };

    let mut state = QueueState::NotAvailable;
    let mut strays = Vec::new();
    for queue in active {
        if queue == static_queue || queue == generalized {
            state = QueueState::Available;
        } else {
            strays.push(queue.clone());
        }
    }
    (state, strays)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_name_parsing() {
        assert_eq!(
            parse_member_name("SIP/6916ua"),
            Some(("6916".to_string(), "ua".to_string()))
        );
        assert_eq!(
            parse_member_name("SIP/1007kz-extra"),
            Some(("1007".to_string(), "kz".to_string()))
        );
        assert_eq!(parse_member_name("SIP/691ua"), None);
        assert_eq!(parse_member_name("SIP/6916"), None);
        assert_eq!(parse_member_name("SIP/6916UA"), None);
        assert_eq!(parse_member_name("noslash"), None);
        // Multi-byte names must be rejected, not panic on slicing.
        assert_eq!(parse_member_name("SIP/абвгde"), None);
        assert_eq!(parse_member_name("SIP/691émw"), None);
    }

    fn active(queues: &[&str]) -> BTreeSet<String> {
        queues.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn static_queue_membership_is_available() {
        let (state, strays) = availability("myqueue1", &active(&["myqueue1"]));
        assert_eq!(state, QueueState::Available);
        assert!(strays.is_empty());
    }

    #[test]
    fn generalized_queue_counts_as_available() {
        // Trailing digit stripped: queue12 generalizes to queue1.
        let (state, strays) = availability("queue12", &active(&["queue1"]));
        assert_eq!(state, QueueState::Available);
        assert!(strays.is_empty());
    }

    #[test]
    fn foreign_memberships_are_strays() {
        let (state, strays) = availability("myqueue1", &active(&["other", "myqueue1"]));
        assert_eq!(state, QueueState::Available);
        assert_eq!(strays, vec!["other".to_string()]);

        let (state, strays) = availability("myqueue1", &active(&["other"]));
        assert_eq!(state, QueueState::NotAvailable);
        assert_eq!(strays, vec!["other".to_string()]);
    }

    #[test]
    fn grouping_skips_unparseable_names() {
        let frames = vec![
            AmiFrame::from_fields(vec![
                ("Event".to_string(), "QueueMember".to_string()),
                ("Queue".to_string(), "myqueue1".to_string()),
                ("Name".to_string(), "SIP/6916ua".to_string()),
            ]),
            AmiFrame::from_fields(vec![
                ("Event".to_string(), "QueueMember".to_string()),
                ("Queue".to_string(), "myqueue2".to_string()),
                ("Name".to_string(), "SIP/6916ua".to_string()),
            ]),
            AmiFrame::from_fields(vec![
                ("Event".to_string(), "QueueMember".to_string()),
                ("Queue".to_string(), "myqueue1".to_string()),
                ("Name".to_string(), "Agent/trunk".to_string()),
            ]),
        ];
        let map = group_memberships(&frames);
        assert_eq!(map.len(), 1);
        let queues = &map[&("6916".to_string(), "ua".to_string())];
        assert_eq!(queues.len(), 2);
    }
}
