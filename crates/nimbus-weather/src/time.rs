//! Helpers for the forecast API's local wall-clock timestamps.
//!
//! With `timezone=auto` the API returns times such as `2025-06-15T05:45`
//! without an offset; the offset arrives separately as `utc_offset_seconds`.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Parse an API timestamp into an absolute time.
pub fn parse_local(raw: &str, utc_offset_seconds: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_seconds)?;
    let naive = NaiveDateTime::parse_from_str(raw, API_TIME_FORMAT).ok()?;
    offset.from_local_datetime(&naive).single()
}

/// Short clock time, e.g. "5:45 PM".
pub fn format_clock(time: &DateTime<FixedOffset>) -> String {
    time.format("%-I:%M %p").to_string()
}

/// Index of the first sample that is not in the past, or 0 when none is.
pub fn current_hour_index(times: &[String], utc_offset_seconds: i32, now: DateTime<Utc>) -> usize {
    times
        .iter()
        .position(|raw| {
            parse_local(raw, utc_offset_seconds)
                .map(|t| t.with_timezone(&Utc) >= now)
                .unwrap_or(false)
        })
        .unwrap_or(0)
}
