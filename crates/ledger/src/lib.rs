//! Taxrail ledger - per-period append-only balance ledger
//!
//! Every entry is hash-chained to its predecessor and carries the running
//! balance; the period's Merkle root summarizes the whole slice. Entries are
//! created exactly once per transfer id and never mutated or deleted.

pub mod chain;
pub mod entry;
pub mod store;

pub use chain::{verify_chain, ChainError};
pub use entry::{entry_hash, LedgerEntry};
pub use store::{
    append, balance, entries, entry_by_transfer_id, inclusion_proof, slice_merkle_root, tail,
    LedgerTail,
};

use taxrail_store::StoreError;
use thiserror::Error;

/// Errors from ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transfer id already recorded: {transfer_id}")]
    DuplicateTransfer { transfer_id: String },

    #[error("Insufficient ledger balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },

    #[error("Chain integrity failure: {0}")]
    Chain(#[from] ChainError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}
