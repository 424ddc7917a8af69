//! Time parsing utilities for scheduler output.

use chrono::{DateTime, Local, NaiveDateTime};

/// Grid Engine's stand-in for an unlimited `h_rt`/`h_cpu`, in `HH:MM:SS`.
pub const INFINITY_TIME: &str = "10000:00:00";

/// Parse a classic SGE accounting timestamp ("Mon Nov  9 12:42:26 2020").
///
/// Runs of whitespace are tolerated since day numbers are space padded.
pub fn parse_sge_timestamp(s: &str) -> Option<NaiveDateTime> {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y").ok()
}

/// Parse a Univa accounting timestamp ("11/19/2020 13:09:58.720").
pub fn parse_univa_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%m/%d/%Y %H:%M:%S%.f").ok()
}

/// Convert epoch seconds to local wall-clock time.
pub fn from_epoch_secs(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.with_timezone(&Local).naive_local())
}

/// Convert epoch milliseconds to local wall-clock time.
pub fn from_epoch_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&Local).naive_local())
}

/// Parse `HH:MM:SS` (hours may exceed 24) into whole minutes, dropping seconds.
///
/// `INFINITY` is read as [`INFINITY_TIME`].
pub fn hms_to_minutes(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = if s == "INFINITY" { INFINITY_TIME } else { s };

    let mut parts = s.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    hours.checked_mul(60)?.checked_add(minutes)
}

/// None when the result does not fit in a `u64`.
pub fn minutes_to_seconds(minutes: u64) -> Option<u64> {
    minutes.checked_mul(60)
}
