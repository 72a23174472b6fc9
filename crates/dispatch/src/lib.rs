//! Taxrail dispatch - the only writer of fund movement
//!
//! Resolves an allow-listed destination, performs the bank transfer with the
//! job's transfer id as idempotency key, and appends the ledger entry, the
//! idempotency marker and the audit row in one store transaction. A
//! duplicate transfer id short-circuits to the previously recorded result;
//! the external call is never re-executed.

mod bank;
mod dead_letter;
mod destinations;
mod dispatcher;

pub use bank::{BankError, BankProvider, BankReceipt, TransferRequest};
pub use dead_letter::{list as list_dead_letters, remove as remove_dead_letter, DeadLetterEntry, SqliteDeadLetterSink};
pub use destinations::{Destination, DestinationBook, DestinationEntry};
pub use dispatcher::{markers_for_period, release_audit_payload, Dispatcher, TransferMarker};

use taxrail_core::{PeriodError, PeriodKey, Rail};
use taxrail_queue::JobFailure;
use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from release dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] taxrail_ledger::LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] taxrail_audit::AuditError),

    #[error("Period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Period not found: {0}")]
    PeriodNotFound(PeriodKey),

    #[error("Destination not allow-listed: entity {entity} rail {rail} reference {reference}")]
    DestNotAllowListed {
        entity: String,
        rail: Rail,
        reference: String,
    },

    #[error("Insufficient ledger balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },

    #[error("Bank provider transient failure: {0}")]
    BankTransient(String),

    #[error("Bank provider rejected transfer: {0}")]
    BankRejected(String),
}

impl From<rusqlite::Error> for DispatchError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

impl DispatchError {
    /// Map to the queue's retry classification.
    ///
    /// Store and provider hiccups retry; policy, validation and integrity
    /// failures dead-letter on first sight.
    pub fn into_job_failure(self) -> JobFailure {
        match self {
            DispatchError::BankTransient(_) | DispatchError::Store(_) => {
                JobFailure::Transient(self.to_string())
            }
            other => JobFailure::Permanent(other.to_string()),
        }
    }
}
