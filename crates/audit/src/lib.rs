//! Taxrail audit - single global tamper-evident event log
//!
//! An independent hash chain from the ledger's: each entry's terminal hash
//! is `digest(prev_hash ∥ payload_hash)` where `prev_hash` is the previous
//! entry's terminal hash (empty for the first). Covers every privileged
//! action: flag changes, approvals, releases, reconciliation runs.
//!
//! Appends run inside the caller's store transaction so the side effect
//! being audited and its audit row commit or roll back together.

mod log;

pub use log::{
    append, entries_for_payload_hash, read_all, verify_chain, AuditChainError, AuditEntry,
};

use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from the audit log
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Canonicalization error: {0}")]
    Canon(#[from] taxrail_core::CanonError),

    #[error("Audit chain integrity failure: {0}")]
    Chain(#[from] AuditChainError),
}

impl From<rusqlite::Error> for AuditError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}
