//! Wall-clock helpers.
//!
//! Candle timestamps are **milliseconds since Unix epoch** (bar-open time).
//! The store additionally keeps a human-readable UTC rendering next to each row.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 3_600_000;

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> i64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_millis() as i64
}

/// Format an epoch-millisecond timestamp as UTC `YYYY-MM-DD HH:MM:SS`.
///
/// Out-of-range values render as an empty string.
pub fn ms_to_datetime_text(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Convert a vendor bar time in (possibly fractional) seconds to milliseconds.
#[inline]
pub fn secs_f64_to_ms(secs: f64) -> i64 {
    (secs * 1_000.0).round() as i64
}

/// Cutoff timestamp for a retention window of `hours`, relative to `now_ms`.
#[inline]
pub fn retention_cutoff_ms(now_ms: i64, hours: u64) -> i64 {
    now_ms.saturating_sub((hours as i64).saturating_mul(HOUR_MS))
}
