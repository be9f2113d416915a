//! Timestamp utilities and fixed-window arithmetic

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Floor `at` to a multiple of `window_secs` (unix seconds)
pub fn window_start(at: DateTime<Utc>, window_secs: i64) -> i64 {
    let ts = at.timestamp();
    ts - ts.rem_euclid(window_secs)
}

/// Start of the UTC minute containing `at` (unix seconds)
pub fn minute_start(at: DateTime<Utc>) -> i64 {
    window_start(at, 60)
}

/// Start of the UTC day containing `at` (unix seconds)
pub fn day_start(at: DateTime<Utc>) -> i64 {
    window_start(at, 86_400)
}

/// Calendar date (UTC) used to index resized images
pub fn resize_date(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// `days` calendar days before `date`
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date - Duration::days(i64::from(days))
}

/// Unix milliseconds to UTC timestamp (clamped to the epoch on overflow)
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
