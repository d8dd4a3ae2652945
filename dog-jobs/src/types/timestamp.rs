//! Canonical text form of timestamps at the store boundary.
//!
//! Fixed width, UTC, microsecond precision, so lexical order is time order and
//! SQL comparisons on the text columns behave.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{QueueError, QueueResult};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// `0000-01-01 00:00:00.000000` in microseconds since the epoch
const EARLIEST_STORABLE_MICROS: i64 = -62_167_219_200_000_000;

/// `9999-12-31 23:59:59.999999` in microseconds since the epoch
const LATEST_STORABLE_MICROS: i64 = 253_402_300_799_999_999;

/// Earliest instant whose text form keeps lexical order equal to time order
pub fn earliest_storable() -> DateTime<Utc> {
    DateTime::from_timestamp_micros(EARLIEST_STORABLE_MICROS).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Latest instant with a four-digit year
pub fn latest_storable() -> DateTime<Utc> {
    DateTime::from_timestamp_micros(LATEST_STORABLE_MICROS).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn is_storable(ts: DateTime<Utc>) -> bool {
    (earliest_storable()..=latest_storable()).contains(&ts)
}

/// Reject instants outside years 0000..=9999
pub fn ensure_storable(ts: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
    if is_storable(ts) {
        Ok(ts)
    } else {
        Err(QueueError::Serialization(format!(
            "timestamp {} is outside years 0000..=9999",
            ts
        )))
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> QueueResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| QueueError::Serialization(format!("invalid timestamp '{}': {}", text, e)))
}

/// Nullable column helper: `None` stays `None`, never a sentinel date
pub fn format_optional(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_timestamp)
}

pub fn parse_optional(text: Option<&str>) -> QueueResult<Option<DateTime<Utc>>> {
    text.map(parse_timestamp).transpose()
}

/// Drop sub-microsecond precision so values survive a store round trip unchanged
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}
