//! Small numeric helpers shared by the analytics engines.

use chrono::{TimeZone, Utc};

/// Seconds in a week.
pub const WEEK_SECS: i64 = 604_800;

/// The Unix epoch fell on a Thursday; shifting by three days aligns week
/// buckets to Mondays.
pub const MONDAY_OFFSET: i64 = 259_200;

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for an empty slice.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Mean over up to the last `window` values.
pub fn rolling_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let start = values.len().saturating_sub(window);
    mean(&values[start..])
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Epoch-aligned week bucket for a timestamp.
pub fn epoch_week(unix: i64) -> i64 {
    unix - unix.rem_euclid(WEEK_SECS)
}

/// Monday-aligned week bucket for a timestamp.
pub fn monday_week(unix: i64) -> i64 {
    let shifted = unix + MONDAY_OFFSET;
    (shifted - shifted.rem_euclid(WEEK_SECS)) - MONDAY_OFFSET
}

/// Format a Unix timestamp as an ISO date (YYYY-MM-DD).
pub fn format_date(unix: i64) -> String {
    match Utc.timestamp_opt(unix, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d").to_string(),
        _ => String::new(),
    }
}
