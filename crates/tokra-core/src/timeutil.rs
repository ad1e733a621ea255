//! ISO-8601 datetime helpers.
//!
//! Instants travel through the ledger as ISO-8601 strings with millisecond
//! precision, so lexicographic order equals chronological order. Rows in the
//! wild may carry malformed values; every parser here degrades gracefully
//! instead of failing the read path.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

/// Current instant, ISO-8601 with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 instant into Unix seconds. `None` on malformed input.
pub fn parse_to_timestamp(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

/// Unix seconds back to an ISO-8601 instant.
pub fn from_unix_timestamp(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(now_iso)
}

/// True when `s` names an instant strictly before now. Malformed input is
/// never "past": a grant with an unreadable expiry keeps counting.
pub fn is_past(s: &str) -> bool {
    match parse_to_timestamp(s) {
        Some(ts) => ts < Utc::now().timestamp(),
        None => false,
    }
}

/// Current instant shifted by `secs`.
pub fn now_plus(secs: i64) -> String {
    (Utc::now() + Duration::seconds(secs)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `iso + secs`, or `None` when `iso` is malformed.
pub fn add_seconds(iso: &str, secs: i64) -> Option<String> {
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| {
            (dt.with_timezone(&Utc) + Duration::seconds(secs))
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
}

/// Midnight UTC of the day containing `s`.
pub fn start_of_day(s: &str) -> Option<String> {
    let dt = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
    let start = dt.date_naive().and_hms_milli_opt(0, 0, 0, 0)?;
    Some(Utc.from_utc_datetime(&start).to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Last millisecond of the day containing `s`.
pub fn end_of_day(s: &str) -> Option<String> {
    let dt = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
    let end = dt.date_naive().and_hms_milli_opt(23, 59, 59, 999)?;
    Some(Utc.from_utc_datetime(&end).to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NEVER_EXPIRES;

    #[test]
    fn round_trip_through_unix_seconds() {
        let iso = "2026-08-01T12:30:45.000Z";
        let ts = parse_to_timestamp(iso).unwrap();
        assert_eq!(from_unix_timestamp(ts), iso);
    }

    #[test]
    fn malformed_input_is_tolerated() {
        assert_eq!(parse_to_timestamp("not-a-date"), None);
        assert!(!is_past("not-a-date"));
        assert!(!is_past(""));
        assert_eq!(add_seconds("garbage", 60), None);
    }

    #[test]
    fn never_sentinel_is_never_past() {
        assert!(!is_past(NEVER_EXPIRES));
        assert!(parse_to_timestamp(NEVER_EXPIRES).is_some());
    }

    #[test]
    fn past_instants_are_past() {
        assert!(is_past("2001-01-01T00:00:00.000Z"));
        assert!(!is_past("9000-01-01T00:00:00.000Z"));
    }

    #[test]
    fn add_seconds_moves_the_instant() {
        let later = add_seconds("2026-08-01T00:00:00.000Z", 300).unwrap();
        assert_eq!(later, "2026-08-01T00:05:00.000Z");
    }

    #[test]
    fn day_bounds() {
        let s = start_of_day("2026-08-01T15:04:05.000Z").unwrap();
        let e = end_of_day("2026-08-01T15:04:05.000Z").unwrap();
        assert_eq!(s, "2026-08-01T00:00:00.000Z");
        assert_eq!(e, "2026-08-01T23:59:59.999Z");
    }

    #[test]
    fn iso_order_is_chronological_order() {
        let a = "2026-08-01T00:00:00.000Z";
        let b = "2026-08-01T00:00:00.001Z";
        let c = NEVER_EXPIRES;
        assert!(a < b && b < c);
    }
}
