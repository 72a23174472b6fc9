//! Audit log rows and chain operations

use crate::AuditError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taxrail_core::canon::canonical_json;
use taxrail_core::hash::digest;
use taxrail_store::{parse_ts, StoreError};
use thiserror::Error;

/// One immutable audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Global, strictly increasing, starting at 1.
    pub seq: u64,
    pub actor: String,
    pub action: String,
    pub payload: Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub terminal_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Errors in audit chain verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditChainError {
    #[error("Broken link at seq {seq}: expected prev_hash '{expected}', got '{actual}'")]
    BrokenLink {
        seq: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid terminal hash at seq {seq}: expected '{expected}', got '{actual}'")]
    InvalidTerminalHash {
        seq: u64,
        expected: String,
        actual: String,
    },

    #[error("Payload hash mismatch at seq {seq}")]
    PayloadMismatch { seq: u64 },

    #[error("Sequence must increase by one: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },
}

/// Append one audit entry and return its terminal hash.
///
/// # Contract
/// MUST run inside [`taxrail_store::Database::with_tx`], in the same
/// transaction as the side effect it records: if the transaction aborts,
/// neither the side effect nor the audit row is observable. The tail read
/// and insert are serialized by the store's exclusive transaction.
pub fn append(
    tx: &Transaction<'_>,
    actor: &str,
    action: &str,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<String, AuditError> {
    let (seq, prev_hash) = match chain_tail(tx)? {
        Some((seq, terminal)) => (seq + 1, terminal),
        None => (1, String::new()),
    };

    let canonical = canonical_json(payload);
    let payload_hash = digest(&canonical);
    let terminal_hash = digest(format!("{prev_hash}{payload_hash}"));

    tx.execute(
        "INSERT INTO audit_log
         (seq, actor, action, payload_json, payload_hash, prev_hash, terminal_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            seq as i64,
            actor,
            action,
            canonical,
            payload_hash,
            prev_hash,
            terminal_hash,
            now.to_rfc3339(),
        ],
    )?;

    tracing::debug!(seq, actor, action, "audit entry appended");
    Ok(terminal_hash)
}

fn chain_tail(conn: &Connection) -> Result<Option<(u64, String)>, AuditError> {
    let mut stmt =
        conn.prepare("SELECT seq, terminal_hash FROM audit_log ORDER BY seq DESC LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some((row.get::<_, i64>(0)? as u64, row.get(1)?))),
        None => Ok(None),
    }
}

/// Read the whole audit log in sequence order.
pub fn read_all(conn: &Connection) -> Result<Vec<AuditEntry>, AuditError> {
    let mut stmt = conn.prepare(
        "SELECT seq, actor, action, payload_json, payload_hash, prev_hash, terminal_hash, created_at
         FROM audit_log ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map([], map_row)?;
    collect_rows(rows)
}

/// Audit entries whose payload hash matches, in sequence order.
///
/// The evidence builder uses this to pull the rows recording a specific
/// release payload.
pub fn entries_for_payload_hash(
    conn: &Connection,
    payload_hash: &str,
) -> Result<Vec<AuditEntry>, AuditError> {
    let mut stmt = conn.prepare(
        "SELECT seq, actor, action, payload_json, payload_hash, prev_hash, terminal_hash, created_at
         FROM audit_log WHERE payload_hash = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![payload_hash], map_row)?;
    collect_rows(rows)
}

type RawRow = (i64, String, String, String, String, String, String, String);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<AuditEntry>, AuditError> {
    let mut result = Vec::new();
    for row in rows {
        let (seq, actor, action, payload_json, payload_hash, prev_hash, terminal_hash, created) =
            row.map_err(StoreError::from)?;
        let payload: Value =
            serde_json::from_str(&payload_json).map_err(StoreError::Serialization)?;
        result.push(AuditEntry {
            seq: seq as u64,
            actor,
            action,
            payload,
            payload_hash,
            prev_hash,
            terminal_hash,
            created_at: parse_ts(&created)?,
        });
    }
    Ok(result)
}

/// Walk the full log and fail closed on any break.
pub fn verify_chain(conn: &Connection) -> Result<u64, AuditError> {
    let entries = read_all(conn)?;
    let mut prev_hash = String::new();
    let mut expected_seq: u64 = 1;

    for entry in &entries {
        if entry.seq != expected_seq {
            return Err(AuditChainError::InvalidSequence {
                expected: expected_seq,
                actual: entry.seq,
            }
            .into());
        }
        if entry.prev_hash != prev_hash {
            return Err(AuditChainError::BrokenLink {
                seq: entry.seq,
                expected: prev_hash,
                actual: entry.prev_hash.clone(),
            }
            .into());
        }
        let recomputed_payload = digest(canonical_json(&entry.payload));
        if recomputed_payload != entry.payload_hash {
            return Err(AuditChainError::PayloadMismatch { seq: entry.seq }.into());
        }
        let recomputed = digest(format!("{}{}", entry.prev_hash, entry.payload_hash));
        if recomputed != entry.terminal_hash {
            return Err(AuditChainError::InvalidTerminalHash {
                seq: entry.seq,
                expected: recomputed,
                actual: entry.terminal_hash.clone(),
            }
            .into());
        }
        prev_hash = entry.terminal_hash.clone();
        expected_seq += 1;
    }

    Ok(entries.len() as u64)
}
