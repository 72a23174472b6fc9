//! Taxrail store - the single authoritative datastore
//!
//! One SQLite connection behind a mutex. Every multi-step write runs inside
//! one transaction via [`Database::with_tx`] and rolls back wholesale on any
//! step failure, so no partial ledger/audit state is ever observable. The
//! mutex plus SQLite's transactional writes give the "read tail, then insert
//! next" serialization both hash chains depend on.

mod db;
mod error;
pub mod periods;

pub use db::Database;
pub use error::StoreError;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp stored as TEXT.
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("bad timestamp: {value}")))
}
