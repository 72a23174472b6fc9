//! Taxrail office - wires everything together
//!
//! [`BackOffice`] owns the shared store and every engine: accrual into the
//! ledger, period close (reconcile then attest), gated release through the
//! idempotent queue, evidence bundles, chain verification and dead-letter
//! replay. The excluded UI/API layer consumes these as plain function calls.

mod config;
mod office;

pub use config::{ConfigError, KeyringEntry, OfficeConfig};
pub use office::{BackOffice, ChainReport, CloseOutcome, ReplayReport};

use taxrail_core::PeriodKey;
use thiserror::Error;

/// Errors surfaced by back-office operations
#[derive(Debug, Error)]
pub enum OfficeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] taxrail_store::StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] taxrail_ledger::LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Period error: {0}")]
    Period(#[from] taxrail_core::PeriodError),

    #[error("Amount error: {0}")]
    Units(#[from] taxrail_core::UnitsError),

    #[error("Reconciliation error: {0}")]
    Recon(#[from] taxrail_recon::ReconError),

    #[error("Token error: {0}")]
    Rpt(#[from] taxrail_rpt::RptError),

    #[error("Approval error: {0}")]
    Approval(#[from] taxrail_approval::ApprovalError),

    #[error("Queue error: {0}")]
    Queue(#[from] taxrail_queue::QueueError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] taxrail_dispatch::DispatchError),

    #[error("Evidence error: {0}")]
    Evidence(#[from] taxrail_evidence::EvidenceError),

    #[error("No active release proof token for {0}")]
    NoActiveToken(PeriodKey),

    #[error("Period not found: {0}")]
    PeriodNotFound(PeriodKey),
}
