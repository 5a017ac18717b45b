//! Time and timestamp utilities
//!
//! Archive partitions and replay ranges share one textual format,
//! `YYYY/MM/DD/HH/MM`, always in UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::{EventReplayError, Result};

/// chrono format string for a minute partition
pub const MINUTE_FORMAT: &str = "%Y/%m/%d/%H/%M";

/// Current time in UTC
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Current Unix timestamp in milliseconds
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Truncate any timestamp to the start of its minute, in UTC
pub fn truncate_to_minute<Tz: TimeZone>(ts: &DateTime<Tz>) -> DateTime<Utc> {
    let utc = ts.with_timezone(&Utc);
    utc.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(utc)
}

/// Format a timestamp as `YYYY/MM/DD/HH/MM` in UTC
pub fn format_minute<Tz: TimeZone>(ts: &DateTime<Tz>) -> String {
    ts.with_timezone(&Utc).format(MINUTE_FORMAT).to_string()
}

/// Parse a `YYYY/MM/DD/HH/MM` string as a UTC minute
pub fn parse_minute(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, MINUTE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| EventReplayError::InvalidTimestamp(value.to_string()))
}

/// Parse an epoch timestamp attribute.
///
/// 13-digit values are milliseconds, shorter ones seconds. Milliseconds are
/// kept so minute truncation happens on the real instant and an event sent at
/// `:59.600` stays in its own minute.
pub fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let raw: i64 = trimmed.parse().ok()?;
    if trimmed.trim_start_matches('-').len() >= 13 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_format_minute_normalizes_to_utc() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = est.with_ymd_and_hms(2024, 10, 15, 12, 5, 42).unwrap();
        assert_eq!(format_minute(&local), "2024/10/15/17/05");

        let utc = Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 42).unwrap();
        assert_eq!(format_minute(&utc), format_minute(&local));
    }

    #[test]
    fn test_truncate_to_minute() {
        let ts = Utc.timestamp_millis_opt(1_729_011_959_999).unwrap();
        let truncated = truncate_to_minute(&ts);
        assert_eq!(truncated.second(), 0);
        assert_eq!(truncated.nanosecond(), 0);
        assert_eq!(truncated.minute(), ts.minute());
    }

    #[test]
    fn test_parse_minute() {
        let ts = parse_minute("2024/10/15/17/05").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 0).unwrap());

        assert!(parse_minute("2024-10-15 17:05").is_err());
        assert!(parse_minute("2024/13/15/17/05").is_err());
    }

    #[test]
    fn test_parse_epoch_seconds_and_millis() {
        let secs = parse_epoch("1729011900").unwrap();
        let millis = parse_epoch("1729011900000").unwrap();
        assert_eq!(secs, millis);

        // 17:05:59.600 must not round up into 17:06
        let late = parse_epoch("1729011959600").unwrap();
        assert_eq!(format_minute(&late), format_minute(&secs));

        assert!(parse_epoch("not-a-number").is_none());
    }
}
