//! Job payloads and the processing seams

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taxrail_core::{Cents, EntityId, PeriodId, PeriodKey, Rail, TaxType};
use thiserror::Error;

/// One fund-movement job.
///
/// The transfer id is fixed at enqueue time and reused verbatim on retry and
/// on dead-letter replay, so the downstream idempotency marker guards
/// against duplicate execution no matter how often the job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseJob {
    pub transfer_id: String,
    pub entity_id: EntityId,
    pub tax_type: TaxType,
    pub period_id: PeriodId,
    pub amount_cents: Cents,
    pub rail: Rail,
    pub reference: String,
}

impl ReleaseJob {
    pub fn period_key(&self) -> PeriodKey {
        PeriodKey::new(
            self.entity_id.clone(),
            self.tax_type,
            self.period_id.clone(),
        )
    }
}

/// Result of a successfully executed release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub transfer_id: String,
    pub receipt_hash: String,
}

/// How a processing attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobFailure {
    /// Worth retrying with backoff (store hiccup, provider timeout).
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying cannot help (policy rejection, integrity failure).
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Executes one job attempt.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, job: &ReleaseJob) -> Result<ReleaseReceipt, JobFailure>;
}

/// Receives jobs whose retry budget is exhausted.
///
/// A sink failure is reported back so the queue can log it loudly; a
/// dead-lettered job must never vanish silently.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    async fn record(&self, job: &ReleaseJob, attempts: u32, last_error: &str)
        -> Result<(), String>;
}
