//! Hash chain verification for a period's ledger slice

use crate::entry::{entry_hash, LedgerEntry};
use thiserror::Error;

/// Errors in ledger chain verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Broken link at entry {entry_id}: expected prev_hash '{expected}', got '{actual}'")]
    BrokenLink {
        entry_id: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash at entry {entry_id}: expected '{expected}', got '{actual}'")]
    InvalidHash {
        entry_id: u64,
        expected: String,
        actual: String,
    },

    #[error("Entry ids must increase by one: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },

    #[error("Running balance broken at entry {entry_id}: expected {expected}, got {actual}")]
    InvalidBalance {
        entry_id: u64,
        expected: i64,
        actual: i64,
    },
}

/// Verify chain links, per-entry hashes, id ordering and the running balance.
///
/// Entries must be the full period slice in id order, starting at entry 1.
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<(), ChainError> {
    let mut prev_hash = String::new();
    let mut balance: i64 = 0;
    let mut expected_id: u64 = 1;

    for entry in entries {
        if entry.entry_id != expected_id {
            return Err(ChainError::InvalidSequence {
                expected: expected_id,
                actual: entry.entry_id,
            });
        }

        if entry.prev_hash != prev_hash {
            return Err(ChainError::BrokenLink {
                entry_id: entry.entry_id,
                expected: prev_hash,
                actual: entry.prev_hash.clone(),
            });
        }

        balance += entry.amount_cents;
        if entry.balance_after_cents != balance {
            return Err(ChainError::InvalidBalance {
                entry_id: entry.entry_id,
                expected: balance,
                actual: entry.balance_after_cents,
            });
        }

        let calculated = entry_hash(&entry.prev_hash, &entry.receipt_hash, entry.balance_after_cents);
        if entry.hash_after != calculated {
            return Err(ChainError::InvalidHash {
                entry_id: entry.entry_id,
                expected: calculated,
                actual: entry.hash_after.clone(),
            });
        }

        prev_hash = entry.hash_after.clone();
        expected_id += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taxrail_core::hash::digest;

    fn make_entry(entry_id: u64, prev_hash: &str, amount: i64, balance_before: i64) -> LedgerEntry {
        let balance_after = balance_before + amount;
        let receipt_hash = digest(format!("receipt-{entry_id}"));
        let hash_after = entry_hash(prev_hash, &receipt_hash, balance_after);
        LedgerEntry {
            entry_id,
            transfer_id: format!("tr-{entry_id}"),
            amount_cents: amount,
            balance_after_cents: balance_after,
            receipt_hash,
            prev_hash: prev_hash.to_string(),
            hash_after,
            created_at: Utc::now(),
        }
    }

    fn make_chain(amounts: &[i64]) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = Vec::new();
        let mut prev = String::new();
        let mut balance = 0;
        for (i, amount) in amounts.iter().enumerate() {
            let entry = make_entry(i as u64 + 1, &prev, *amount, balance);
            prev = entry.hash_after.clone();
            balance = entry.balance_after_cents;
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_empty_chain_valid() {
        assert!(verify_chain(&[]).is_ok());
    }

    #[test]
    fn test_valid_chain() {
        let entries = make_chain(&[60_000, 90_000, -150_000]);
        assert!(verify_chain(&entries).is_ok());
        assert_eq!(entries.last().unwrap().balance_after_cents, 0);
    }

    #[test]
    fn test_broken_link_detected() {
        let mut entries = make_chain(&[100, 200]);
        entries[1].prev_hash = digest("tampered");
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::BrokenLink { entry_id: 2, .. })
        ));
    }

    #[test]
    fn test_tampered_balance_detected() {
        let mut entries = make_chain(&[100, 200]);
        entries[1].balance_after_cents = 999;
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::InvalidBalance { entry_id: 2, .. })
        ));
    }

    #[test]
    fn test_tampered_hash_detected() {
        let mut entries = make_chain(&[100]);
        entries[0].hash_after = digest("forged");
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::InvalidHash { entry_id: 1, .. })
        ));
    }

    #[test]
    fn test_gap_in_ids_detected() {
        let mut entries = make_chain(&[100, 200]);
        entries[1].entry_id = 3;
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::InvalidSequence {
                expected: 2,
                actual: 3
            })
        ));
    }
}
