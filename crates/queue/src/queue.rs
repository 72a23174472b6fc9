//! The bounded release queue

use crate::job::{DeadLetterSink, JobFailure, JobProcessor, ReleaseJob, ReleaseReceipt};
use crate::QueueError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};

/// Queue policy.
///
/// No serde fallback defaults; `Default` is for tests and dev wiring only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum backlog before `enqueue` rejects with `Saturated`.
    pub capacity: usize,
    /// Concurrent workers.
    pub workers: usize,
    /// First retry delay in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,
    /// Cap on the computed backoff delay.
    pub max_delay_ms: u64,
    /// Total processing attempts before dead-lettering.
    pub max_attempts: u32,
    /// Pause between items during dead-letter replay.
    pub replay_throttle_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            workers: 4,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 5,
            replay_throttle_ms: 50,
        }
    }
}

/// Point-in-time queue gauges, published on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetrics {
    pub depth: usize,
    pub active: usize,
    pub capacity: usize,
}

impl QueueMetrics {
    /// Backlog as a fraction of capacity.
    pub fn saturation(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.depth as f64 / self.capacity as f64
        }
    }
}

struct Gauges {
    depth: AtomicUsize,
    active: AtomicUsize,
    capacity: usize,
    metrics_tx: watch::Sender<QueueMetrics>,
}

impl Gauges {
    fn publish(&self) {
        let snapshot = QueueMetrics {
            depth: self.depth.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            capacity: self.capacity,
        };
        let _ = self.metrics_tx.send(snapshot);
    }
}

struct Envelope {
    job: ReleaseJob,
    reply: oneshot::Sender<Result<ReleaseReceipt, QueueError>>,
}

/// Bounded, retrying, dead-lettering job queue.
///
/// Once accepted a job runs to completion, retry-exhaustion or
/// dead-lettering; there is no cancel. Dropping the caller's future only
/// abandons the reply, not the job.
pub struct ReleaseQueue {
    tx: mpsc::Sender<Envelope>,
    metrics_rx: watch::Receiver<QueueMetrics>,
    gauges: Arc<Gauges>,
    config: QueueConfig,
}

impl ReleaseQueue {
    pub fn new(
        config: QueueConfig,
        processor: Arc<dyn JobProcessor>,
        sink: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(config.capacity.max(1));
        let (metrics_tx, metrics_rx) = watch::channel(QueueMetrics {
            depth: 0,
            active: 0,
            capacity: config.capacity,
        });
        let gauges = Arc::new(Gauges {
            depth: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            capacity: config.capacity,
            metrics_tx,
        });

        let dispatcher_gauges = gauges.clone();
        let dispatcher_config = config.clone();
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(dispatcher_config.workers.max(1)));
            loop {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let envelope = match rx.recv().await {
                    Some(envelope) => envelope,
                    None => break,
                };
                dispatcher_gauges.depth.fetch_sub(1, Ordering::SeqCst);
                dispatcher_gauges.active.fetch_add(1, Ordering::SeqCst);
                dispatcher_gauges.publish();

                let processor = processor.clone();
                let sink = sink.clone();
                let gauges = dispatcher_gauges.clone();
                let config = dispatcher_config.clone();
                tokio::spawn(async move {
                    run_job(envelope, processor, sink, &config).await;
                    gauges.active.fetch_sub(1, Ordering::SeqCst);
                    gauges.publish();
                    drop(permit);
                });
            }
        });

        Self {
            tx,
            metrics_rx,
            gauges,
            config,
        }
    }

    /// Submit a job and wait for its terminal outcome.
    ///
    /// Rejects immediately with `Saturated` when the backlog is full.
    pub async fn enqueue(&self, job: ReleaseJob) -> Result<ReleaseReceipt, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.tx.try_send(Envelope {
            job,
            reply: reply_tx,
        }) {
            Ok(()) => {
                self.gauges.depth.fetch_add(1, Ordering::SeqCst);
                self.gauges.publish();
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(capacity = self.config.capacity, "release queue saturated");
                return Err(QueueError::Saturated {
                    capacity: self.config.capacity,
                });
            }
            Err(TrySendError::Closed(_)) => return Err(QueueError::Closed),
        }

        reply_rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Current gauges.
    pub fn metrics(&self) -> QueueMetrics {
        *self.metrics_rx.borrow()
    }

    /// Subscribe to gauge updates.
    pub fn subscribe(&self) -> watch::Receiver<QueueMetrics> {
        self.metrics_rx.clone()
    }

    /// Replay throttle, exposed for the dead-letter replay driver.
    pub fn replay_throttle(&self) -> Duration {
        Duration::from_millis(self.config.replay_throttle_ms)
    }
}

async fn run_job(
    envelope: Envelope,
    processor: Arc<dyn JobProcessor>,
    sink: Arc<dyn DeadLetterSink>,
    config: &QueueConfig,
) {
    let job = envelope.job;
    let mut attempt: u32 = 1;

    let outcome = loop {
        match processor.process(&job).await {
            Ok(receipt) => break Ok(receipt),
            Err(JobFailure::Permanent(message)) => break Err((attempt, message)),
            Err(JobFailure::Transient(message)) => {
                if attempt >= config.max_attempts {
                    break Err((attempt, message));
                }
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    transfer_id = %job.transfer_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "release attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    };

    match outcome {
        Ok(receipt) => {
            let _ = envelope.reply.send(Ok(receipt));
        }
        Err((attempts, last_error)) => {
            tracing::error!(
                transfer_id = %job.transfer_id,
                attempts,
                error = %last_error,
                "release exhausted retries, dead-lettering"
            );
            if let Err(sink_error) = sink.record(&job, attempts, &last_error).await {
                tracing::error!(
                    transfer_id = %job.transfer_id,
                    error = %sink_error,
                    "dead-letter sink failed; job outcome only in logs"
                );
            }
            let _ = envelope.reply.send(Err(QueueError::DeadLettered {
                transfer_id: job.transfer_id.clone(),
                attempts,
                last_error,
            }));
        }
    }
}

/// `base * 2^(attempt-1)`, capped at the configured maximum.
fn backoff_delay(config: &QueueConfig, attempt: u32) -> Duration {
    let shift = (attempt - 1).min(20);
    let raw = config.base_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(raw.min(config.max_delay_ms))
}
