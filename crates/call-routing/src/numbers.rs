//! Number validation, country inference and time normalization.

use crate::HIDDEN_OPPONENT;
use chrono::{Duration, NaiveDateTime};
use tracing::warn;

/// The PBX writes timestamps in its local zone with this format; the
/// portals expect raw UTC in the same format.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Countries whose local numbering is longer than the common minimum.
const LONG_NUMBER_COUNTRY: &str = "ua";

fn digit_count(number: &str) -> usize {
    number.chars().filter(|c| c.is_ascii_digit()).count()
}

/// Reject number pairs the portals would bounce: inner extensions
/// outside [3,5] characters, opponents shorter than 7 digits (9 for
/// the long-number country). The hidden-opponent sentinel passes.
pub fn validate_numbers(inner: &str, opponent: &str, country: &str) -> bool {
    let inner_len = inner.chars().count();
    if !(3..=5).contains(&inner_len) {
        return false;
    }
    if opponent == HIDDEN_OPPONENT {
        return true;
    }
    let min_digits = if country == LONG_NUMBER_COUNTRY { 9 } else { 7 };
    digit_count(opponent) >= min_digits
}

/// Infer the tenant country from the opponent number's dialing prefix.
///
/// Used when the inner number is provisioned under more than one tenant
/// and ownership cannot be trusted. Prefixes are checked in a fixed
/// priority order.
pub fn resolve_country_by_prefix(opponent: &str) -> Option<&'static str> {
    let number = opponent.strip_prefix('+').unwrap_or(opponent);
    let bytes = number.as_bytes();

    if number.starts_with("380") || (number.starts_with('0') && number.len() == 10) {
        return Some("ua");
    }
    if number.starts_with("77") {
        return Some("kz");
    }
    if number.starts_with("80") || number.starts_with("375") {
        return Some("by");
    }
    if bytes.len() >= 2
        && matches!(bytes[0], b'7' | b'8')
        && matches!(bytes[1], b'3' | b'4' | b'8' | b'9')
    {
        return Some("ru");
    }
    None
}

/// Convert a PBX-local timestamp to UTC, keeping the wire format.
/// Returns None (with a log entry) when the input does not parse; the
/// caller drops the record.
pub fn normalize_start_time(raw: &str, tz_offset_hours: i32) -> Option<String> {
    match NaiveDateTime::parse_from_str(raw, TIME_FORMAT) {
        Ok(local) => {
            let utc = local - Duration::hours(tz_offset_hours as i64);
            Some(utc.format(TIME_FORMAT).to_string())
        }
        Err(e) => {
            warn!(raw, error = %e, "Unparseable start time");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_length_bounds() {
        assert!(!validate_numbers("12", "0501234567", "ua"));
        assert!(validate_numbers("123", "0501234567", "ua"));
        assert!(validate_numbers("12345", "0501234567", "ua"));
        assert!(!validate_numbers("123456", "0501234567", "ua"));
    }

    #[test]
    fn opponent_minimum_digits() {
        // Seven digits suffice everywhere but the long-number country.
        assert!(validate_numbers("1234", "1234567", "kz"));
        assert!(!validate_numbers("1234", "123456", "kz"));

        assert!(validate_numbers("1234", "050123456", "ua"));
        assert!(!validate_numbers("1234", "05012345", "ua"));
    }

    #[test]
    fn hidden_sentinel_is_always_valid() {
        assert!(validate_numbers("1234", HIDDEN_OPPONENT, "ua"));
        assert!(validate_numbers("1234", HIDDEN_OPPONENT, "kz"));
    }

    #[test]
    fn country_prefixes_in_priority_order() {
        assert_eq!(resolve_country_by_prefix("+380501234567"), Some("ua"));
        assert_eq!(resolve_country_by_prefix("0501234567"), Some("ua"));
        assert_eq!(resolve_country_by_prefix("77012345678"), Some("kz"));
        assert_eq!(resolve_country_by_prefix("80291234567"), Some("by"));
        assert_eq!(resolve_country_by_prefix("+375291234567"), Some("by"));
        assert_eq!(resolve_country_by_prefix("79161234567"), Some("ru"));
        assert_eq!(resolve_country_by_prefix("84951234567"), Some("ru"));
        assert_eq!(resolve_country_by_prefix("12025550123"), None);
        assert_eq!(resolve_country_by_prefix("xxxx"), None);
        assert_eq!(resolve_country_by_prefix(""), None);
    }

    #[test]
    fn start_time_shifts_to_utc() {
        assert_eq!(
            normalize_start_time("2015-06-01 12:30:00", 2).unwrap(),
            "2015-06-01 10:30:00"
        );
        // Negative offsets shift forward.
        assert_eq!(
            normalize_start_time("2015-06-01 12:30:00", -3).unwrap(),
            "2015-06-01 15:30:00"
        );
        assert!(normalize_start_time("yesterday", 2).is_none());
    }
}
