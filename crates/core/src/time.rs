//! Timestamp helpers. Stored timestamps are ISO-8601 UTC with millisecond
//! precision; expiry arithmetic is integer seconds.

use chrono::{SecondsFormat, Utc};

/// Current time as ISO-8601 UTC with milliseconds, e.g. `2026-08-01T12:00:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_timestamps_are_utc_millis() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        // 2026-08-01T12:00:00.000Z — fixed width
        assert_eq!(ts.len(), 24);
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert_eq!(parsed.timezone().utc_minus_local(), 0);
    }

    #[test]
    fn iso_timestamps_sort_lexicographically() {
        let a = now_iso();
        let b = now_iso();
        assert!(a <= b);
    }
}
