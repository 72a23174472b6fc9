//! Ledger entry and its hash

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taxrail_core::hash::digest;

/// One immutable ledger row.
///
/// # Invariants
/// - `hash_after = digest(prev_hash ∥ receipt_hash ∥ balance_after_cents)`
/// - `balance_after_cents[n] = balance_after_cents[n-1] + amount_cents[n]`
/// - the first entry's `prev_hash` is the empty string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Strictly increasing per period, starting at 1.
    pub entry_id: u64,
    /// Globally unique idempotency key.
    pub transfer_id: String,
    /// Signed delta: accrual credits positive, releases negative.
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub receipt_hash: String,
    pub prev_hash: String,
    pub hash_after: String,
    pub created_at: DateTime<Utc>,
}

/// Hash of one chain link: `digest(prev_hash ∥ receipt_hash ∥ balance_after)`.
///
/// The balance is rendered as its decimal string so the hash input is
/// unambiguous and reproducible from the stored row alone.
pub fn entry_hash(prev_hash: &str, receipt_hash: &str, balance_after_cents: i64) -> String {
    digest(format!("{prev_hash}{receipt_hash}{balance_after_cents}"))
}
