//! The back office itself

use crate::config::OfficeConfig;
use crate::OfficeError;
use chrono::{Duration, Utc};
use std::sync::Arc;
use taxrail_approval::ApprovalGate;
use taxrail_core::hash::digest;
use taxrail_core::{Cents, Period, PeriodKey, Rail};
use taxrail_dispatch::{
    BankProvider, DestinationBook, Dispatcher, SqliteDeadLetterSink,
};
use taxrail_evidence::EvidenceBundle;
use taxrail_ledger::LedgerEntry;
use taxrail_queue::{JobProcessor, QueueError, QueueMetrics, ReleaseJob, ReleaseQueue, ReleaseReceipt};
use taxrail_recon::{ReconciliationEngine, ReconciliationResult, ReconOutcome, SourceAggregates};
use taxrail_rpt::{Keyring, ReleaseProofToken, RptIssuer, RptVerifier, TokenSigner};
use taxrail_store::Database;

/// Outcome of closing a period.
#[derive(Debug)]
pub enum CloseOutcome {
    /// Reconciled clean; a release proof token was issued.
    Ready {
        recon: ReconciliationResult,
        token: ReleaseProofToken,
    },
    /// Blocked on a discrepancy or anomaly; the result says which.
    Blocked { recon: ReconciliationResult },
}

/// Result of a full chain verification sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub audit_entries: u64,
    pub ledger_periods: usize,
    pub ledger_entries: usize,
}

/// Result of a dead-letter replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: Vec<String>,
    pub still_parked: Vec<String>,
}

/// Owns the store and every engine; the single entry point for callers.
pub struct BackOffice {
    db: Database,
    basis: String,
    sources: Arc<dyn SourceAggregates>,
    recon: ReconciliationEngine,
    issuer: RptIssuer,
    verifier: RptVerifier,
    approvals: ApprovalGate,
    queue: ReleaseQueue,
}

impl BackOffice {
    /// Wire up all components. Must run inside a tokio runtime: the release
    /// queue spawns its worker pool on construction.
    pub fn new(
        db: Database,
        config: OfficeConfig,
        sources: Arc<dyn SourceAggregates>,
        bank: Arc<dyn BankProvider>,
    ) -> Result<Self, OfficeError> {
        let signer = TokenSigner::from_hex(&config.signer_seed_hex)?;

        let mut keyring = Keyring::new();
        for entry in &config.keyring {
            keyring.add_hex(entry.kid.clone(), &entry.public_key_hex)?;
        }

        let book = DestinationBook::from_entries(config.destinations);
        let processor: Arc<dyn JobProcessor> = Arc::new(Dispatcher::new(db.clone(), book, bank));
        let sink = Arc::new(SqliteDeadLetterSink::new(db.clone()));
        let queue = ReleaseQueue::new(config.queue, processor, sink);

        Ok(Self {
            recon: ReconciliationEngine::new(db.clone(), config.recon),
            issuer: RptIssuer::new(
                db.clone(),
                signer,
                config.rules.clone(),
                Duration::hours(config.rpt_window_hours),
            ),
            verifier: RptVerifier::new(keyring, config.rules),
            approvals: ApprovalGate::new(db.clone(), config.approval),
            queue,
            basis: config.basis,
            sources,
            db,
        })
    }

    /// Credit an accrued liability into the period's ledger.
    ///
    /// Creates the period OPEN on first accrual. The idempotency key is the
    /// ledger transfer id: a duplicate returns the previously recorded entry
    /// without touching the period totals again.
    pub fn accrue(
        &self,
        key: &PeriodKey,
        amount: Cents,
        idempotency_key: &str,
        actor: &str,
    ) -> Result<LedgerEntry, OfficeError> {
        let now = Utc::now();
        let receipt_hash = digest(format!("accrual:{idempotency_key}"));

        self.db.with_tx(|tx| {
            // Conflict resolution: a replayed idempotency key returns the
            // recorded entry without touching the period again.
            if let Some(existing) = taxrail_ledger::entry_by_transfer_id(tx, idempotency_key)? {
                return Ok(existing);
            }

            let mut period = match taxrail_store::periods::load(tx, key)? {
                Some(period) => period,
                None => Period::open(key.clone(), self.basis.clone(), now),
            };
            period.ensure_amounts_mutable()?;

            let entry = taxrail_ledger::append(
                tx,
                key,
                idempotency_key,
                amount.value(),
                &receipt_hash,
                now,
            )?;

            period.accrued_cents = period
                .accrued_cents
                .checked_add(amount)
                .ok_or(taxrail_core::UnitsError::Overflow)?;
            period.credited_cents = period
                .credited_cents
                .checked_add(amount)
                .ok_or(taxrail_core::UnitsError::Overflow)?;
            period.running_balance_hash = entry.hash_after.clone();
            let entries = taxrail_ledger::entries(tx, key)?;
            period.merkle_root = taxrail_ledger::slice_merkle_root(&entries);
            period.updated_at = now;
            taxrail_store::periods::upsert(tx, &period)?;

            let payload = serde_json::json!({
                "period": key,
                "transfer_id": idempotency_key,
                "amount_cents": amount,
                "balance_after_cents": entry.balance_after_cents,
            });
            taxrail_audit::append(tx, actor, "ledger.accrue", &payload, now)?;

            Ok(entry)
        })
    }

    /// Close a period: reconcile, and if clean, issue the release proof.
    pub fn close_period(&self, key: &PeriodKey, actor: &str) -> Result<CloseOutcome, OfficeError> {
        let recon = self.recon.recompute(self.sources.as_ref(), key, actor)?;
        match recon.outcome {
            ReconOutcome::Ready => {
                let token = self.issuer.issue(key, actor)?;
                Ok(CloseOutcome::Ready { recon, token })
            }
            _ => Ok(CloseOutcome::Blocked { recon }),
        }
    }

    /// Register one approval for the period's pending release amount.
    pub fn approve_release(
        &self,
        key: &PeriodKey,
        approver_id: &str,
        role: taxrail_approval::ApprovalRole,
        reason: &str,
    ) -> Result<(), OfficeError> {
        let token = self.active_token(key)?;
        self.approvals
            .register(key, token.payload.amount_cents, approver_id, role, reason)?;
        Ok(())
    }

    /// Release the period's attested amount onto a bank rail.
    ///
    /// Verifies the active token (fail closed), checks the dual-approval
    /// gate, then runs the job through the idempotent queue. The transfer id
    /// derives from the release hash, so re-invoking for the same (period,
    /// amount) converges on the same ledger entry and receipt.
    pub async fn release_period(
        &self,
        key: &PeriodKey,
        rail: Rail,
        reference: &str,
    ) -> Result<ReleaseReceipt, OfficeError> {
        let token = self.active_token(key)?;
        self.verifier.verify(&token, Utc::now())?;

        let amount = token.payload.amount_cents;
        self.approvals.ensure(key, amount)?;

        let release_hash = taxrail_approval::release_hash(key, amount)?;
        let job = ReleaseJob {
            transfer_id: format!("REL-{}", &release_hash[..24]),
            entity_id: key.entity_id.clone(),
            tax_type: key.tax_type,
            period_id: key.period_id.clone(),
            amount_cents: amount,
            rail,
            reference: reference.to_string(),
        };

        Ok(self.queue.enqueue(job).await?)
    }

    /// Build the canonical evidence bundle for a period.
    pub fn evidence(&self, key: &PeriodKey) -> Result<EvidenceBundle, OfficeError> {
        Ok(taxrail_evidence::build(&self.db, key)?)
    }

    /// Verify the audit chain and every period's ledger chain.
    pub fn verify_chains(&self) -> Result<ChainReport, OfficeError> {
        self.db.with_tx(|tx| {
            let audit_entries = taxrail_audit::verify_chain(tx)?;
            let keys = taxrail_store::periods::list_keys(tx)?;
            let mut ledger_entries = 0;
            for key in &keys {
                let entries = taxrail_ledger::entries(tx, key)?;
                taxrail_ledger::verify_chain(&entries)
                    .map_err(taxrail_ledger::LedgerError::from)?;
                ledger_entries += entries.len();
            }
            Ok(ChainReport {
                audit_entries,
                ledger_periods: keys.len(),
                ledger_entries,
            })
        })
    }

    /// Current period row.
    pub fn period(&self, key: &PeriodKey) -> Result<Period, OfficeError> {
        self.db
            .with_conn(|conn| taxrail_store::periods::load(conn, key))?
            .ok_or_else(|| OfficeError::PeriodNotFound(key.clone()))
    }

    /// Parked jobs awaiting operator attention.
    pub fn dead_letters(&self) -> Result<Vec<taxrail_dispatch::DeadLetterEntry>, OfficeError> {
        Ok(self.db.with_conn(taxrail_dispatch::list_dead_letters)?)
    }

    /// Re-run every parked job with its original payload and transfer id,
    /// throttled between items. A replay that succeeds removes its dead
    /// letter; one that fails again stays parked (with refreshed error).
    pub async fn replay_dead_letters(&self) -> Result<ReplayReport, OfficeError> {
        let parked = self.dead_letters()?;
        let throttle = self.queue.replay_throttle();
        let mut report = ReplayReport::default();

        for (i, entry) in parked.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(throttle).await;
            }
            match self.queue.enqueue(entry.job.clone()).await {
                Ok(receipt) => {
                    self.db
                        .with_tx(|tx| taxrail_dispatch::remove_dead_letter(tx, &entry.transfer_id))?;
                    tracing::info!(
                        transfer_id = %entry.transfer_id,
                        receipt_hash = %receipt.receipt_hash,
                        "dead letter replayed successfully"
                    );
                    report.replayed.push(entry.transfer_id);
                }
                Err(QueueError::Saturated { .. }) => {
                    // Queue full mid-replay; leave the rest for the next pass.
                    report.still_parked.push(entry.transfer_id);
                }
                Err(err) => {
                    tracing::warn!(
                        transfer_id = %entry.transfer_id,
                        error = %err,
                        "dead letter replay failed"
                    );
                    report.still_parked.push(entry.transfer_id);
                }
            }
        }

        Ok(report)
    }

    /// Queue gauges.
    pub fn queue_metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    fn active_token(&self, key: &PeriodKey) -> Result<ReleaseProofToken, OfficeError> {
        self.db
            .with_conn(|conn| taxrail_rpt::load_active(conn, key))?
            .ok_or_else(|| OfficeError::NoActiveToken(key.clone()))
    }
}
