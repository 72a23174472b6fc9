//! Ledger persistence on the shared store

use crate::entry::{entry_hash, LedgerEntry};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use taxrail_core::hash::{merkle_root, MerkleProof};
use taxrail_core::PeriodKey;
use taxrail_store::{parse_ts, StoreError};

/// Current tail of one period's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTail {
    pub entry_id: u64,
    pub hash_after: String,
    pub balance_after_cents: i64,
}

/// Read the chain tail for a period, if any entries exist.
pub fn tail(conn: &Connection, key: &PeriodKey) -> Result<Option<LedgerTail>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, hash_after, balance_after_cents
         FROM ledger_entries
         WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3
         ORDER BY entry_id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![
        key.entity_id.as_str(),
        key.tax_type.to_string(),
        key.period_id.as_str()
    ])?;
    match rows.next()? {
        Some(row) => Ok(Some(LedgerTail {
            entry_id: row.get::<_, i64>(0)? as u64,
            hash_after: row.get(1)?,
            balance_after_cents: row.get(2)?,
        })),
        None => Ok(None),
    }
}

/// Current running balance (0 for an empty slice).
pub fn balance(conn: &Connection, key: &PeriodKey) -> Result<i64, LedgerError> {
    Ok(tail(conn, key)?.map_or(0, |t| t.balance_after_cents))
}

/// Append one entry to the period's chain.
///
/// # Contract
/// MUST run inside [`taxrail_store::Database::with_tx`]: the tail read and
/// the insert form one "read tail, compute next hash, insert" unit, and only
/// the store's exclusive transaction makes that race-free. A negative
/// resulting balance aborts with `InsufficientBalance`; a duplicate transfer
/// id aborts with `DuplicateTransfer` (callers treat that as "already
/// processed" and return the previously recorded result).
pub fn append(
    tx: &Transaction<'_>,
    key: &PeriodKey,
    transfer_id: &str,
    amount_cents: i64,
    receipt_hash: &str,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, LedgerError> {
    let current = tail(tx, key)?;
    let (entry_id, prev_hash, prev_balance) = match current {
        Some(t) => (t.entry_id + 1, t.hash_after, t.balance_after_cents),
        None => (1, String::new(), 0),
    };

    let balance_after = prev_balance + amount_cents;
    if balance_after < 0 {
        return Err(LedgerError::InsufficientBalance {
            have: prev_balance,
            need: -amount_cents,
        });
    }

    let hash_after = entry_hash(&prev_hash, receipt_hash, balance_after);
    let entry = LedgerEntry {
        entry_id,
        transfer_id: transfer_id.to_string(),
        amount_cents,
        balance_after_cents: balance_after,
        receipt_hash: receipt_hash.to_string(),
        prev_hash,
        hash_after,
        created_at: now,
    };

    let inserted = tx.execute(
        "INSERT INTO ledger_entries
         (entity_id, tax_type, period_id, entry_id, transfer_id, amount_cents,
          balance_after_cents, receipt_hash, prev_hash, hash_after, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            key.entity_id.as_str(),
            key.tax_type.to_string(),
            key.period_id.as_str(),
            entry.entry_id as i64,
            entry.transfer_id,
            entry.amount_cents,
            entry.balance_after_cents,
            entry.receipt_hash,
            entry.prev_hash,
            entry.hash_after,
            entry.created_at.to_rfc3339(),
        ],
    );

    match inserted {
        Ok(_) => Ok(entry),
        Err(err) => {
            let store_err = StoreError::from(err);
            if store_err.is_unique_violation() {
                Err(LedgerError::DuplicateTransfer {
                    transfer_id: transfer_id.to_string(),
                })
            } else {
                Err(LedgerError::Store(store_err))
            }
        }
    }
}

/// Full ledger slice for a period, in entry id order.
pub fn entries(conn: &Connection, key: &PeriodKey) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, transfer_id, amount_cents, balance_after_cents,
                receipt_hash, prev_hash, hash_after, created_at
         FROM ledger_entries
         WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3
         ORDER BY entry_id ASC",
    )?;
    let rows = stmt.query_map(
        params![
            key.entity_id.as_str(),
            key.tax_type.to_string(),
            key.period_id.as_str()
        ],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        },
    )?;

    let mut result = Vec::new();
    for row in rows {
        let (entry_id, transfer_id, amount, balance_after, receipt, prev, hash_after, created) =
            row.map_err(StoreError::from)?;
        result.push(LedgerEntry {
            entry_id: entry_id as u64,
            transfer_id,
            amount_cents: amount,
            balance_after_cents: balance_after,
            receipt_hash: receipt,
            prev_hash: prev,
            hash_after,
            created_at: parse_ts(&created)?,
        });
    }
    Ok(result)
}

/// Find the entry recorded for a transfer id, if any.
pub fn entry_by_transfer_id(
    conn: &Connection,
    transfer_id: &str,
) -> Result<Option<LedgerEntry>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, transfer_id, amount_cents, balance_after_cents,
                receipt_hash, prev_hash, hash_after, created_at
         FROM ledger_entries WHERE transfer_id = ?1",
    )?;
    let mut rows = stmt.query(params![transfer_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(LedgerEntry {
            entry_id: row.get::<_, i64>(0)? as u64,
            transfer_id: row.get(1)?,
            amount_cents: row.get(2)?,
            balance_after_cents: row.get(3)?,
            receipt_hash: row.get(4)?,
            prev_hash: row.get(5)?,
            hash_after: row.get(6)?,
            created_at: parse_ts(&row.get::<_, String>(7)?)?,
        })),
        None => Ok(None),
    }
}

/// Merkle root over a slice's `hash_after` leaves, in entry id order.
pub fn slice_merkle_root(entries: &[LedgerEntry]) -> String {
    let leaves: Vec<String> = entries.iter().map(|e| e.hash_after.clone()).collect();
    merkle_root(&leaves)
}

/// Inclusion proof for one entry against the slice's Merkle root.
pub fn inclusion_proof(entries: &[LedgerEntry], entry_id: u64) -> Option<MerkleProof> {
    let index = entries.iter().position(|e| e.entry_id == entry_id)?;
    let leaves: Vec<String> = entries.iter().map(|e| e.hash_after.clone()).collect();
    MerkleProof::generate(&leaves, index).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_chain;
    use taxrail_core::hash::digest;
    use taxrail_core::{EntityId, PeriodId, TaxType};
    use taxrail_store::Database;

    fn key() -> PeriodKey {
        PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::WithheldTax,
            PeriodId::new("2025-09").unwrap(),
        )
    }

    fn append_one(db: &Database, transfer_id: &str, amount: i64) -> Result<LedgerEntry, LedgerError> {
        db.with_tx(|tx| {
            append(
                tx,
                &key(),
                transfer_id,
                amount,
                &digest(format!("receipt-{transfer_id}")),
                Utc::now(),
            )
        })
    }

    #[test]
    fn test_append_builds_valid_chain() {
        let db = Database::in_memory().unwrap();
        append_one(&db, "tr-1", 60_000).unwrap();
        append_one(&db, "tr-2", 90_000).unwrap();
        append_one(&db, "tr-3", -150_000).unwrap();

        let entries = db.with_conn(|conn| entries(conn, &key())).unwrap();
        assert_eq!(entries.len(), 3);
        verify_chain(&entries).unwrap();
        assert_eq!(entries[2].balance_after_cents, 0);
        assert_eq!(entries[0].prev_hash, "");
    }

    #[test]
    fn test_duplicate_transfer_id_rejected() {
        let db = Database::in_memory().unwrap();
        append_one(&db, "tr-1", 100).unwrap();
        let err = append_one(&db, "tr-1", 100).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransfer { .. }));

        // The failed append left no second row.
        let entries = db.with_conn(|conn| entries(conn, &key())).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_insufficient_balance_aborts() {
        let db = Database::in_memory().unwrap();
        append_one(&db, "tr-1", 100).unwrap();
        let err = append_one(&db, "tr-2", -200).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { have: 100, need: 200 }
        ));
    }

    #[test]
    fn test_tail_and_balance() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.with_conn(|c| balance(c, &key())).unwrap(), 0);
        append_one(&db, "tr-1", 60_000).unwrap();
        append_one(&db, "tr-2", 90_000).unwrap();

        let tail = db.with_conn(|c| tail(c, &key())).unwrap().unwrap();
        assert_eq!(tail.entry_id, 2);
        assert_eq!(tail.balance_after_cents, 150_000);
        assert_eq!(db.with_conn(|c| balance(c, &key())).unwrap(), 150_000);
    }

    #[test]
    fn test_entry_by_transfer_id() {
        let db = Database::in_memory().unwrap();
        let created = append_one(&db, "tr-1", 500).unwrap();
        let found = db
            .with_conn(|c| entry_by_transfer_id(c, "tr-1"))
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
        assert!(db
            .with_conn(|c| entry_by_transfer_id(c, "missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_inclusion_proof_verifies_against_slice_root() {
        let db = Database::in_memory().unwrap();
        append_one(&db, "tr-1", 60_000).unwrap();
        append_one(&db, "tr-2", 90_000).unwrap();
        append_one(&db, "tr-3", -150_000).unwrap();

        let slice = db.with_conn(|conn| entries(conn, &key())).unwrap();
        let root = slice_merkle_root(&slice);
        for entry in &slice {
            let proof = inclusion_proof(&slice, entry.entry_id).unwrap();
            assert!(proof.verify(&root));
        }
        assert!(inclusion_proof(&slice, 99).is_none());
    }

    #[test]
    fn test_slice_merkle_root_changes_with_entries() {
        let db = Database::in_memory().unwrap();
        append_one(&db, "tr-1", 100).unwrap();
        let one = db.with_conn(|c| entries(c, &key())).unwrap();
        append_one(&db, "tr-2", 200).unwrap();
        let two = db.with_conn(|c| entries(c, &key())).unwrap();
        assert_ne!(slice_merkle_root(&one), slice_merkle_root(&two));
    }
}
