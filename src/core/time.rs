//! Timestamp helpers shared across entities, evidence, and diagnostics.

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

/// Current UTC instant.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// RFC3339 with microsecond precision, e.g. `2026-07-28T09:12:03.512000Z`.
///
/// This is the canonical on-disk representation for `created_at`,
/// `updated_at`, `startedAt`, and `completedAt` fields; it round-trips
/// through `DateTime::parse_from_rfc3339`.
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_rfc3339() -> String {
    format_rfc3339(&now_utc())
}

pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A fresh ULID, lexicographically sortable and time-ordered; used for
/// session ids and diagnostic event ids when the caller doesn't supply one.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trips() {
        let now = now_utc();
        let s = format_rfc3339(&now);
        let parsed = parse_rfc3339(&s).unwrap();
        // Microsecond precision formatting loses nanoseconds only.
        assert_eq!(now.timestamp_micros(), parsed.timestamp_micros());
    }

    #[test]
    fn new_id_is_unique_and_valid() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(Ulid::from_string(&a).is_ok());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_rfc3339("not-a-date").is_none());
    }
}
