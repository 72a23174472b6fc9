//! Exactly-once release execution

use crate::bank::{BankError, BankProvider, BankReceipt, TransferRequest};
use crate::destinations::DestinationBook;
use crate::DispatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::Arc;
use taxrail_core::hash::digest;
use taxrail_core::{PeriodKey, PeriodState, Rail};
use taxrail_queue::{JobFailure, JobProcessor, ReleaseJob, ReleaseReceipt};
use taxrail_store::{Database, StoreError};

/// Executes fund movement for release jobs.
pub struct Dispatcher {
    db: Database,
    book: DestinationBook,
    bank: Arc<dyn BankProvider>,
}

/// The canonicalizable audit payload of one dispatched release.
///
/// The evidence builder reconstructs this from the stored idempotency marker
/// to find the matching audit rows by payload hash, so every field must come
/// from the marker or the period key.
pub fn release_audit_payload(
    key: &PeriodKey,
    transfer_id: &str,
    amount_cents: i64,
    rail: Rail,
    reference: &str,
    receipt_hash: &str,
) -> Value {
    serde_json::json!({
        "period": key,
        "transfer_id": transfer_id,
        "amount_cents": amount_cents,
        "rail": rail,
        "reference": reference,
        "receipt_hash": receipt_hash,
    })
}

struct Marker {
    receipt_hash: String,
}

fn marker_for(conn: &Connection, transfer_id: &str) -> Result<Option<Marker>, DispatchError> {
    let mut stmt =
        conn.prepare("SELECT receipt_hash FROM transfer_markers WHERE transfer_id = ?1")?;
    let mut rows = stmt.query(params![transfer_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(Marker {
            receipt_hash: row.get(0)?,
        })),
        None => Ok(None),
    }
}

/// One recorded idempotency marker, enough to rebuild its audit payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMarker {
    pub transfer_id: String,
    pub amount_cents: i64,
    pub rail: Rail,
    pub reference: String,
    pub receipt_hash: String,
}

/// Markers recorded for one period, in insertion order.
pub fn markers_for_period(
    conn: &Connection,
    key: &PeriodKey,
) -> Result<Vec<TransferMarker>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT transfer_id, amount_cents, rail, reference, receipt_hash
         FROM transfer_markers
         WHERE entity_id = ?1 AND tax_type = ?2 AND period_id = ?3
         ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(
        params![
            key.entity_id.as_str(),
            key.tax_type.to_string(),
            key.period_id.as_str()
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    )?;

    let mut markers = Vec::new();
    for row in rows {
        let (transfer_id, amount_cents, rail, reference, receipt_hash) =
            row.map_err(StoreError::from)?;
        markers.push(TransferMarker {
            transfer_id,
            amount_cents,
            rail: Rail::parse(&rail)
                .map_err(|_| StoreError::Corrupt(format!("bad rail: {rail}")))?,
            reference,
            receipt_hash,
        });
    }
    Ok(markers)
}

impl Dispatcher {
    pub fn new(db: Database, book: DestinationBook, bank: Arc<dyn BankProvider>) -> Self {
        Self { db, book, bank }
    }

    /// Release funds for a job, exactly once per transfer id.
    ///
    /// Policy checks (allow-list, balance) run before the external call; the
    /// idempotency marker, ledger append, period transition and audit row
    /// commit in one transaction afterwards. A transfer id that already has
    /// a marker returns the previously recorded receipt without touching the
    /// bank again.
    pub async fn release(&self, job: &ReleaseJob) -> Result<ReleaseReceipt, DispatchError> {
        let key = job.period_key();
        let amount = job.amount_cents.value();

        // Conflict resolution: duplicate ids return the prior result.
        if let Some(marker) = self
            .db
            .with_conn(|conn| marker_for(conn, &job.transfer_id))?
        {
            tracing::info!(
                transfer_id = %job.transfer_id,
                "transfer already processed, returning recorded receipt"
            );
            return Ok(ReleaseReceipt {
                transfer_id: job.transfer_id.clone(),
                receipt_hash: marker.receipt_hash,
            });
        }

        let destination = self
            .book
            .resolve(&job.entity_id, job.rail, &job.reference)
            .ok_or_else(|| DispatchError::DestNotAllowListed {
                entity: job.entity_id.to_string(),
                rail: job.rail,
                reference: job.reference.clone(),
            })?
            .clone();

        // Balance check aborts before any external call.
        let have = self.db.with_conn(|conn| taxrail_ledger::balance(conn, &key))?;
        if have < amount {
            return Err(DispatchError::InsufficientBalance { have, need: amount });
        }

        let receipt = self
            .bank
            .transfer(TransferRequest {
                amount_cents: job.amount_cents,
                destination,
                idempotency_key: job.transfer_id.clone(),
            })
            .await
            .map_err(|err| match err {
                BankError::Retryable(msg) => DispatchError::BankTransient(msg),
                BankError::Rejected(msg) => DispatchError::BankRejected(msg),
            })?;
        let receipt_hash = digest(receipt.receipt_id.as_bytes());

        let now = Utc::now();
        let recorded_hash = self.db.with_tx(|tx| {
            self.commit_release(tx, job, &key, amount, &receipt_hash, now)
        })?;

        tracing::info!(
            transfer_id = %job.transfer_id,
            period = %key,
            amount_cents = amount,
            "release dispatched"
        );
        Ok(ReleaseReceipt {
            transfer_id: job.transfer_id.clone(),
            receipt_hash: recorded_hash,
        })
    }

    /// Marker insert + ledger append + period transition + audit, one unit.
    fn commit_release(
        &self,
        tx: &rusqlite::Transaction<'_>,
        job: &ReleaseJob,
        key: &PeriodKey,
        amount: i64,
        receipt_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, DispatchError> {
        let inserted = tx.execute(
            "INSERT INTO transfer_markers
             (transfer_id, entity_id, tax_type, period_id, amount_cents, rail, reference,
              receipt_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.transfer_id,
                key.entity_id.as_str(),
                key.tax_type.to_string(),
                key.period_id.as_str(),
                amount,
                job.rail.to_string(),
                job.reference,
                receipt_hash,
                now.to_rfc3339(),
            ],
        );
        if let Err(err) = inserted {
            let store_err = StoreError::from(err);
            if store_err.is_unique_violation() {
                // A concurrent dispatcher won the race; its result stands.
                let marker = marker_for(tx, &job.transfer_id)?.ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "marker vanished for transfer {}",
                        job.transfer_id
                    ))
                })?;
                return Ok(marker.receipt_hash);
            }
            return Err(store_err.into());
        }

        let entry = taxrail_ledger::append(tx, key, &job.transfer_id, -amount, receipt_hash, now)?;

        let mut period = taxrail_store::periods::load(tx, key)?
            .ok_or_else(|| DispatchError::PeriodNotFound(key.clone()))?;
        period.transition(PeriodState::Released, now)?;
        // The attested merkle root stays frozen at what the RPT covered;
        // only the chain tail advances with the release entry.
        period.running_balance_hash = entry.hash_after.clone();
        taxrail_store::periods::upsert(tx, &period)?;

        let payload = release_audit_payload(
            key,
            &job.transfer_id,
            amount,
            job.rail,
            &job.reference,
            receipt_hash,
        );
        taxrail_audit::append(tx, "system", "release.dispatch", &payload, now)?;

        Ok(receipt_hash.to_string())
    }
}

#[async_trait]
impl JobProcessor for Dispatcher {
    async fn process(&self, job: &ReleaseJob) -> Result<ReleaseReceipt, JobFailure> {
        self.release(job).await.map_err(|e| e.into_job_failure())
    }
}
