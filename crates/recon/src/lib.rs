//! Taxrail reconciliation - compares independent source totals to the ledger
//!
//! The pre-release gatekeeper: a period only becomes eligible for a signed
//! release proof once every liability component reconciles within tolerance
//! and no anomaly metric exceeds its threshold.

mod engine;
mod sources;

pub use engine::{
    read_components, ComponentDelta, ReconConfig, ReconOutcome, ReconciliationEngine,
    ReconciliationResult,
};
pub use sources::{ComponentTotals, SourceAggregates, SourceError};

use taxrail_core::{PeriodError, PeriodKey};
use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from reconciliation
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] taxrail_ledger::LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Period not found: {0}")]
    PeriodNotFound(PeriodKey),

    #[error("Period {0} is released; reconciliation is frozen")]
    AlreadyReleased(PeriodKey),

    #[error("Period {0} is not blocked; nothing to reopen")]
    NotBlocked(PeriodKey),
}

impl From<rusqlite::Error> for ReconError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}
