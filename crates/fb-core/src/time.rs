//! Time utilities for fetchback
//!
//! Timestamp format used for blob object keys.

use chrono::{DateTime, Utc};

/// Timestamp format used inside blob object keys
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Format a timestamp for use in an object key (`20240131-235959`).
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use fb_core::time::key_timestamp;
///
/// let at = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
/// assert_eq!(key_timestamp(at), "20240131-235959");
/// ```
pub fn key_timestamp(at: DateTime<Utc>) -> String {
    at.format(KEY_TIMESTAMP_FORMAT).to_string()
}
