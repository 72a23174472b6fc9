//! Dead-letter persistence

use crate::DispatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use taxrail_queue::{DeadLetterSink, ReleaseJob};
use taxrail_store::{parse_ts, Database, StoreError};

/// One parked job awaiting operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub transfer_id: String,
    pub job: ReleaseJob,
    pub last_error: String,
    pub attempts: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_error_at: DateTime<Utc>,
}

/// Record (or refresh) a dead letter for a job.
///
/// A replay that fails again lands on the same row: attempts and the last
/// error update, the first-seen timestamp stays.
pub fn record(
    conn: &Connection,
    job: &ReleaseJob,
    attempts: u32,
    last_error: &str,
    now: DateTime<Utc>,
) -> Result<(), DispatchError> {
    let payload_json = serde_json::to_string(job).map_err(StoreError::Serialization)?;
    conn.execute(
        "INSERT INTO dead_letters
         (transfer_id, payload_json, last_error, attempts, first_seen_at, last_error_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(transfer_id) DO UPDATE SET
            payload_json = excluded.payload_json,
            last_error = excluded.last_error,
            attempts = excluded.attempts,
            last_error_at = excluded.last_error_at",
        params![
            job.transfer_id,
            payload_json,
            last_error,
            attempts,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// All parked jobs, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<DeadLetterEntry>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT transfer_id, payload_json, last_error, attempts, first_seen_at, last_error_at
         FROM dead_letters ORDER BY first_seen_at ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (transfer_id, payload_json, last_error, attempts, first_seen, last_error_at) =
            row.map_err(StoreError::from)?;
        entries.push(DeadLetterEntry {
            transfer_id,
            job: serde_json::from_str(&payload_json).map_err(StoreError::Serialization)?,
            last_error,
            attempts: attempts as u32,
            first_seen_at: parse_ts(&first_seen)?,
            last_error_at: parse_ts(&last_error_at)?,
        });
    }
    Ok(entries)
}

/// Remove a parked job after a replay re-succeeded.
pub fn remove(tx: &Transaction<'_>, transfer_id: &str) -> Result<bool, DispatchError> {
    let rows = tx.execute(
        "DELETE FROM dead_letters WHERE transfer_id = ?1",
        params![transfer_id],
    )?;
    Ok(rows > 0)
}

/// Queue sink writing dead letters to the shared store.
pub struct SqliteDeadLetterSink {
    db: Database,
}

impl SqliteDeadLetterSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeadLetterSink for SqliteDeadLetterSink {
    async fn record(
        &self,
        job: &ReleaseJob,
        attempts: u32,
        last_error: &str,
    ) -> Result<(), String> {
        let now = Utc::now();
        self.db
            .with_tx(|tx| record(tx, job, attempts, last_error, now))
            .map_err(|e: DispatchError| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxrail_core::{Cents, EntityId, PeriodId, Rail, TaxType};

    fn job(transfer_id: &str) -> ReleaseJob {
        ReleaseJob {
            transfer_id: transfer_id.to_string(),
            entity_id: EntityId::new("12345678901").unwrap(),
            tax_type: TaxType::WithheldTax,
            period_id: PeriodId::new("2025-09").unwrap(),
            amount_cents: Cents::new(150_000).unwrap(),
            rail: Rail::Eft,
            reference: "SEPT".into(),
        }
    }

    #[test]
    fn test_record_and_list() {
        let db = Database::in_memory().unwrap();
        db.with_tx(|tx| record(tx, &job("tr-1"), 5, "provider down", Utc::now()))
            .unwrap();

        let entries = db.with_conn(list).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transfer_id, "tr-1");
        assert_eq!(entries[0].attempts, 5);
        assert_eq!(entries[0].job, job("tr-1"));
    }

    #[test]
    fn test_refailed_replay_updates_same_row() {
        let db = Database::in_memory().unwrap();
        let first = Utc::now();
        db.with_tx(|tx| record(tx, &job("tr-1"), 5, "provider down", first))
            .unwrap();
        db.with_tx(|tx| record(tx, &job("tr-1"), 6, "still down", Utc::now()))
            .unwrap();

        let entries = db.with_conn(list).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 6);
        assert_eq!(entries[0].last_error, "still down");
        assert_eq!(entries[0].first_seen_at, parse_ts(&first.to_rfc3339()).unwrap());
    }

    #[test]
    fn test_remove() {
        let db = Database::in_memory().unwrap();
        db.with_tx(|tx| record(tx, &job("tr-1"), 5, "provider down", Utc::now()))
            .unwrap();

        let removed = db.with_tx(|tx| remove(tx, "tr-1")).unwrap();
        assert!(removed);
        assert!(db.with_conn(list).unwrap().is_empty());

        let removed_again = db.with_tx(|tx| remove(tx, "tr-1")).unwrap();
        assert!(!removed_again);
    }

    #[tokio::test]
    async fn test_sink_records() {
        let db = Database::in_memory().unwrap();
        let sink = SqliteDeadLetterSink::new(db.clone());
        sink.record(&job("tr-9"), 3, "boom").await.unwrap();

        let entries = db.with_conn(list).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transfer_id, "tr-9");
    }
}
