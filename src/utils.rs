use chrono::{Duration, NaiveTime};

use crate::error::LoadError;

const TIME_FORMATS: [&str; 4] = ["%I:%M %p", "%I:%M%p", "%H:%M", "%H:%M:%S"];

/// Build a time of day from literal hour and minute values. Out-of-range
/// input clamps to midnight; parse user-supplied times with
/// [`parse_time_of_day`] instead.
pub fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Parse "10:30 AM", "9:05 am" or "14:20" style times.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, LoadError> {
    let normalized = raw.trim().to_ascii_uppercase();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&normalized, fmt).ok())
        .ok_or_else(|| LoadError::Time(raw.to_string()))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

/// Driving time for `distance` at `speed` distance-units per hour, in whole
/// seconds. Trips too long to represent saturate at `Duration::MAX`.
pub fn travel_time(distance: f64, speed: f64) -> Duration {
    // float-to-int `as` saturates, so only the range check can fail
    let seconds = (distance / speed * 3600.0).round() as i64;
    Duration::try_seconds(seconds).unwrap_or(Duration::MAX)
}

/// `time + delta`, pinned to the last second of the day instead of wrapping.
pub fn advance(time: NaiveTime, delta: Duration) -> NaiveTime {
    match time.overflowing_add_signed(delta) {
        (next, 0) => next,
        _ => NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(time),
    }
}

/// Collapse runs of whitespace so table lookups ignore spacing differences.
pub fn normalize_address(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
