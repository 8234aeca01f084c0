//! Database module for runstate
//!
//! Provides database connectivity, models, repositories, and error handling
//! for the node registry, graph templates and the state ledger.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool};
pub use error::DatabaseError;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp the way every table stores it.
///
/// Fixed-width microsecond RFC 3339 in UTC, so string comparison in SQL
/// orders the same way as time does.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in storage format
pub fn now() -> String {
    timestamp(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let b = timestamp(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(5),
        );
        assert_eq!(a, "2025-01-01T00:00:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
