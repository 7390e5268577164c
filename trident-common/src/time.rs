//! Timestamp utilities
//!
//! Join times arrive from spreadsheets in several layouts. They are parsed
//! as UTC and stored as epoch milliseconds so that ordering is exact.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};

/// Layouts accepted for join times, tried in order
const JOIN_TIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a join time in any accepted layout (or RFC 3339)
pub fn parse_join_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    JOIN_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Synthetic join time for rows without a usable timestamp:
/// 2025-03-01 00:00 UTC plus one minute per activation step.
pub fn fallback_join_time(activation_order: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + Duration::minutes(activation_order)
}

/// Resolve the join time for a record, falling back when the value is
/// missing, unparseable, or an epoch placeholder (year 1970).
pub fn join_time_or_fallback(raw: Option<&str>, activation_order: i64) -> DateTime<Utc> {
    match raw.and_then(parse_join_time) {
        Some(parsed) if parsed.year() != 1970 => parsed,
        _ => fallback_join_time(activation_order),
    }
}

/// Epoch milliseconds for storage
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Stored epoch milliseconds back to a timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_us_layout_without_seconds() {
        let ts = parse_join_time("03/15/2025 14:30").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 3, 15));
        assert_eq!((ts.hour(), ts.minute()), (14, 30));
    }

    #[test]
    fn test_parse_slash_iso_layout() {
        let ts = parse_join_time("2025/04/02 09:05").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 4, 2));
        assert_eq!(ts.minute(), 5);
    }

    #[test]
    fn test_parse_dash_layout_with_seconds() {
        let ts = parse_join_time(" 2025-05-06 07:08:09 ").unwrap();
        assert_eq!(ts.second(), 9);
    }

    #[test]
    fn test_parse_rfc3339_converts_to_utc() {
        let ts = parse_join_time("2025-05-06T10:00:00+02:00").unwrap();
        assert_eq!(ts.hour(), 8);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_join_time("").is_none());
        assert!(parse_join_time("yesterday").is_none());
    }

    #[test]
    fn test_fallback_is_offset_by_activation() {
        let base = fallback_join_time(0);
        assert_eq!((base.year(), base.month(), base.day()), (2025, 3, 1));
        assert_eq!(fallback_join_time(90) - base, Duration::minutes(90));
    }

    #[test]
    fn test_epoch_placeholder_uses_fallback() {
        let ts = join_time_or_fallback(Some("1970-01-01 00:00:00"), 5);
        assert_eq!(ts, fallback_join_time(5));

        let ts = join_time_or_fallback(None, 7);
        assert_eq!(ts, fallback_join_time(7));
    }

    #[test]
    fn test_millis_roundtrip_preserves_order() {
        let a = parse_join_time("2025/04/02 09:05").unwrap();
        let b = parse_join_time("2025/04/02 09:06").unwrap();
        assert!(to_millis(a) < to_millis(b));
        assert_eq!(from_millis(to_millis(a)), a);
    }
}
