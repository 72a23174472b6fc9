//! Taxrail evidence - one canonical artifact per released period
//!
//! Assembles the period, its latest release-proof token, the full ledger
//! slice, the stored reconciliation deltas and the audit rows recording the
//! release into a single canonical JSON document plus its own content hash.
//! Read-only and derived: regenerated on demand, never mutated, and every
//! sub-read happens inside one store transaction so the bundle reflects a
//! single consistent snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taxrail_audit::AuditEntry;
use taxrail_core::canon::to_canonical_json;
use taxrail_core::hash::digest;
use taxrail_core::{Period, PeriodKey};
use taxrail_dispatch::release_audit_payload;
use taxrail_ledger::LedgerEntry;
use taxrail_recon::ComponentDelta;
use taxrail_rpt::ReleaseProofToken;
use taxrail_store::{Database, StoreError};
use thiserror::Error;

/// Errors from bundle assembly
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] taxrail_ledger::LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Reconciliation error: {0}")]
    Recon(#[from] taxrail_recon::ReconError),

    #[error("Token error: {0}")]
    Rpt(#[from] taxrail_rpt::RptError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] taxrail_dispatch::DispatchError),

    #[error("Canonicalization error: {0}")]
    Canon(#[from] taxrail_core::CanonError),

    #[error("Period not found: {0}")]
    PeriodNotFound(PeriodKey),
}

/// Everything covered by the bundle's content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBody {
    pub generated_at: DateTime<Utc>,
    pub period: Period,
    pub rpt: Option<ReleaseProofToken>,
    pub ledger: Vec<LedgerEntry>,
    /// The period's attested Merkle root - the one the RPT embeds.
    pub merkle_root: String,
    pub reconciliation: Vec<ComponentDelta>,
    /// Audit rows whose payload hash matches a recorded release.
    pub release_audit: Vec<AuditEntry>,
}

/// The final artifact: body plus its own content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(flatten)]
    pub body: EvidenceBody,
    pub content_hash: String,
}

impl EvidenceBundle {
    /// Canonical JSON of the whole bundle (hash included).
    pub fn canonical_json(&self) -> Result<String, EvidenceError> {
        Ok(to_canonical_json(self)?)
    }

    /// Recompute the content hash and compare.
    pub fn verify_content_hash(&self) -> Result<bool, EvidenceError> {
        Ok(compute_content_hash(&self.body)? == self.content_hash)
    }
}

fn compute_content_hash(body: &EvidenceBody) -> Result<String, EvidenceError> {
    Ok(digest(to_canonical_json(body)?))
}

/// Assemble the bundle for one period from a single store snapshot.
pub fn build(db: &Database, key: &PeriodKey) -> Result<EvidenceBundle, EvidenceError> {
    let body = db.with_tx(|tx| {
        let period = taxrail_store::periods::load(tx, key)?
            .ok_or_else(|| EvidenceError::PeriodNotFound(key.clone()))?;
        let rpt = taxrail_rpt::load_active(tx, key)?;
        let ledger = taxrail_ledger::entries(tx, key)?;
        // Fail closed on a tampered slice rather than attest to it.
        taxrail_ledger::verify_chain(&ledger).map_err(taxrail_ledger::LedgerError::from)?;
        // The attested root the RPT embedded, frozen at reconciliation.
        let merkle_root = period.merkle_root.clone();
        let reconciliation = taxrail_recon::read_components(tx, key)?;

        let mut release_audit = Vec::new();
        for marker in taxrail_dispatch::markers_for_period(tx, key)? {
            let payload = release_audit_payload(
                key,
                &marker.transfer_id,
                marker.amount_cents,
                marker.rail,
                &marker.reference,
                &marker.receipt_hash,
            );
            let payload_hash = digest(taxrail_core::canonical_json(&payload));
            release_audit.extend(taxrail_audit::entries_for_payload_hash(tx, &payload_hash)?);
        }
        release_audit.sort_by_key(|entry| entry.seq);

        Ok::<_, EvidenceError>(EvidenceBody {
            generated_at: Utc::now(),
            period,
            rpt,
            ledger,
            merkle_root,
            reconciliation,
            release_audit,
        })
    })?;

    let content_hash = compute_content_hash(&body)?;
    Ok(EvidenceBundle { body, content_hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxrail_core::{Cents, EntityId, PeriodId, PeriodState, TaxType};

    fn key() -> PeriodKey {
        PeriodKey::new(
            EntityId::new("12345678901").unwrap(),
            TaxType::WithheldTax,
            PeriodId::new("2025-09").unwrap(),
        )
    }

    fn seed(db: &Database) {
        let now = Utc::now();
        db.with_tx(|tx| {
            taxrail_ledger::append(tx, &key(), "accrual-1", 60_000, &digest("r1"), now)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            taxrail_ledger::append(tx, &key(), "accrual-2", 90_000, &digest("r2"), now)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let entries = taxrail_ledger::entries(tx, &key())
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let mut period = Period::open(key(), "accrual", now);
            period.credited_cents = Cents::new(150_000).unwrap();
            period.final_liability_cents = Cents::new(150_000).unwrap();
            period.merkle_root = taxrail_ledger::slice_merkle_root(&entries);
            period.running_balance_hash = entries.last().unwrap().hash_after.clone();
            taxrail_store::periods::upsert(tx, &period)?;
            Ok::<_, StoreError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_build_missing_period_errors() {
        let db = Database::in_memory().unwrap();
        let err = build(&db, &key()).unwrap_err();
        assert!(matches!(err, EvidenceError::PeriodNotFound(_)));
    }

    #[test]
    fn test_build_snapshot_contents() {
        let db = Database::in_memory().unwrap();
        seed(&db);

        let bundle = build(&db, &key()).unwrap();
        assert_eq!(bundle.body.ledger.len(), 2);
        assert_eq!(bundle.body.period.state, PeriodState::Open);
        assert_eq!(bundle.body.merkle_root, bundle.body.period.merkle_root);
        assert!(bundle.body.rpt.is_none());
        assert!(bundle.verify_content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_detects_mutation() {
        let db = Database::in_memory().unwrap();
        seed(&db);

        let mut bundle = build(&db, &key()).unwrap();
        bundle.body.merkle_root = digest("tampered");
        assert!(!bundle.verify_content_hash().unwrap());
    }

    #[test]
    fn test_tampered_ledger_fails_build() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        db.with_tx(|tx| {
            tx.execute(
                "UPDATE ledger_entries SET balance_after_cents = 1 WHERE entry_id = 2",
                [],
            )
            .map_err(StoreError::from)?;
            Ok::<_, StoreError>(())
        })
        .unwrap();

        let err = build(&db, &key()).unwrap_err();
        assert!(matches!(
            err,
            EvidenceError::Ledger(taxrail_ledger::LedgerError::Chain(_))
        ));
    }

    #[test]
    fn test_canonical_json_is_deterministic_given_body() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let bundle = build(&db, &key()).unwrap();
        assert_eq!(
            bundle.canonical_json().unwrap(),
            bundle.canonical_json().unwrap()
        );
    }
}
