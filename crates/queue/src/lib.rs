//! Taxrail queue - bounded executor for fund-movement jobs
//!
//! Each job is an explicit state machine (attempt count, next-eligible time,
//! terminal outcome) processed by a fixed worker pool over a channel. A full
//! backlog rejects immediately - no job is accepted silently. Failed jobs
//! retry with capped exponential backoff; exhausted jobs are handed to a
//! caller-supplied dead-letter sink and the caller's future resolves with a
//! dead-letter error rather than hanging. Queue metrics are published on a
//! watch channel at every state change.

mod job;
mod queue;

pub use job::{DeadLetterSink, JobFailure, JobProcessor, ReleaseJob, ReleaseReceipt};
pub use queue::{QueueConfig, QueueMetrics, ReleaseQueue};

use thiserror::Error;

/// Terminal errors surfaced to an enqueueing caller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Release queue saturated at capacity {capacity}")]
    Saturated { capacity: usize },

    #[error("Transfer {transfer_id} dead-lettered after {attempts} attempt(s): {last_error}")]
    DeadLettered {
        transfer_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Release queue is shut down")]
    Closed,
}
