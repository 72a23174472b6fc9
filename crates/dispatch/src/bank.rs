//! Bank provider seam
//!
//! The wire protocol is someone else's problem: the provider takes an
//! amount, a destination and an idempotency key and returns a receipt id,
//! or an error already split into retryable and non-retryable.

use crate::destinations::Destination;
use async_trait::async_trait;
use taxrail_core::Cents;
use thiserror::Error;

/// One transfer instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount_cents: Cents,
    pub destination: Destination,
    /// The job's transfer id; the provider must treat it as an idempotency
    /// key and enforce its own timeout.
    pub idempotency_key: String,
}

/// Provider acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankReceipt {
    pub receipt_id: String,
}

/// Provider failure, pre-classified for the retry queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BankError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// The bank rail.
#[async_trait]
pub trait BankProvider: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<BankReceipt, BankError>;
}
