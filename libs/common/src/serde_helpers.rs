//! Shared parsing helpers for payload fields
//!
//! Notification payloads encode timestamps in more than one offset style.

use chrono::{DateTime, Utc};

/// Parse a timestamp in RFC 3339 or the `+0000` offset style
///
/// - `2024-01-01T00:00:00Z`
/// - `2024-01-01T00:00:00.000+00:00`
/// - `2024-01-01T00:00:00.000+0000`
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
