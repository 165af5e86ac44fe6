//! Time-related utilities.

use chrono::{TimeZone, Utc};

/// Get the current Unix timestamp in UTC (milliseconds)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a Unix timestamp (milliseconds) to RFC 3339 format in UTC.
///
/// Out-of-range timestamps are clamped to the Unix epoch.
pub fn millis_to_rfc3339(timestamp_millis: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339()
}
