use chrono::{DateTime, NaiveDateTime, Utc};

use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// Timestamp layout used throughout the message bus, with the day of the year
/// in place of month and day, e.g. `2019-088-14:03:55.372`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%j-%H:%M:%S%.3f";

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Accepts an optional fractional-seconds part of any precision.
pub fn parse_timestamp(s: &str) -> GmsecResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%j-%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            Status::new(
                StatusClass::Field,
                StatusCode::InvalidFieldValue,
                format!("'{}' is not a valid timestamp", s),
            )
        })
}
