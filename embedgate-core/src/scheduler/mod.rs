//! Batch aggregator and scheduler.
//!
//! Worker loops drain the [`BackpressureQueue`], form batches, run them
//! through the [`CircuitBreaker`] against the [`InferenceBackend`] and fan the
//! results back out to each caller.
//!
//! # Cycle
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ 1. wait up to dequeue_wait for the first request         │
//!   │ 2. deadline = oldest admission + max_wait                │
//!   │ 3. keep draining until max_batch_size or deadline        │
//!   │      full      → FlushReason::Size                       │
//!   │      deadline  → FlushReason::Timer (even if < min size) │
//!   │      closed    → FlushReason::Drain                      │
//!   │ 4. concatenate payloads, remember spans                  │
//!   │ 5. breaker.call(timeout(backend.infer(items)))           │
//!   │ 6. fan out per span, or the same error to everyone       │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A batch succeeds or fails as a whole. The scheduler never retries; a
//! failed batch counts as one failure in the breaker window.

mod batch;
mod config;

pub use batch::Batch;
pub use config::SchedulerConfig;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::InferenceBackend;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{BackendError, BreakerError, CoreError};
use crate::events::{BatchOutcome, BatchSummary, EventSink, FlushReason, GateEvent};
use crate::queue::BackpressureQueue;
use crate::types::Embedding;

/// Forms batches from the queue and dispatches them to the backend
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<BackpressureQueue>,
    breaker: Arc<CircuitBreaker>,
    backend: Arc<dyn InferenceBackend>,
    events: Arc<dyn EventSink>,
    next_batch_id: AtomicU64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<BackpressureQueue>,
        breaker: Arc<CircuitBreaker>,
        backend: Arc<dyn InferenceBackend>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            queue,
            breaker,
            backend,
            events,
            next_batch_id: AtomicU64::new(1),
        }
    }

    /// Spawn `config.workers` scheduler loops on the current runtime
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|worker| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.run_worker(worker).await })
            })
            .collect()
    }

    /// Run one worker loop until the queue is closed and drained
    pub async fn run_worker(&self, worker: usize) {
        tracing::debug!(worker, backend = self.backend.name(), "Scheduler worker started");
        loop {
            match self.next_batch().await {
                Some(batch) => {
                    self.execute(batch).await;
                }
                None if self.queue.is_closed() && self.queue.is_empty() => break,
                None => {}
            }
        }
        tracing::debug!(worker, "Scheduler worker stopped");
    }

    /// Form one batch and dispatch it. `None` when nothing arrived within
    /// `dequeue_wait`.
    pub async fn run_once(&self) -> Option<BatchSummary> {
        let batch = self.next_batch().await?;
        Some(self.execute(batch).await)
    }

    /// Drain the queue into the next batch according to the size/timer
    /// trigger.
    pub async fn next_batch(&self) -> Option<Batch> {
        let max = self.config.max_batch_size;
        let mut requests = self.queue.dequeue_batch(max, self.config.dequeue_wait).await;
        let oldest = requests.iter().map(|r| r.enqueued_at).min()?;

        // Timer started when the oldest drained request was admitted
        let deadline = oldest + self.config.max_wait;
        while requests.len() < max {
            let now = Instant::now();
            if now >= deadline || self.queue.is_closed() {
                // One last non-waiting sweep so a closing queue drains in full batches
                let rest = self.queue.dequeue_batch(max - requests.len(), Duration::ZERO).await;
                requests.extend(rest);
                break;
            }
            let more = self.queue.dequeue_batch(max - requests.len(), deadline - now).await;
            if more.is_empty() {
                break;
            }
            requests.extend(more);
        }

        let reason = if requests.len() >= max {
            FlushReason::Size
        } else if self.queue.is_closed() {
            FlushReason::Drain
        } else {
            FlushReason::Timer
        };

        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        Some(Batch::new(id, requests, reason))
    }

    /// Run `batch` through the breaker and resolve every caller
    pub async fn execute(&self, mut batch: Batch) -> BatchSummary {
        let batch_id = batch.id();
        let requests = batch.len();
        let reason = batch.reason();
        let undersized = reason == FlushReason::Timer && requests < self.config.min_batch_size;
        let oldest_wait = batch
            .oldest_enqueued()
            .map(|at| at.elapsed())
            .unwrap_or_default();

        let items = batch.take_items();
        let expected = items.len();
        tracing::debug!(
            batch_id,
            requests,
            items = expected,
            reason = reason.as_str(),
            undersized,
            "Dispatching batch"
        );

        let started = Instant::now();
        let result = self.invoke(items, expected).await;
        let latency = started.elapsed();

        let (outcome, result) = match result {
            Ok(embeddings) => (BatchOutcome::Success, Ok(embeddings)),
            Err(BreakerError::Open) => {
                self.events.emit(&GateEvent::BreakerRejected { batch_id });
                (BatchOutcome::BreakerOpen, Err(CoreError::BreakerOpen))
            }
            Err(BreakerError::Inner(err)) => {
                tracing::warn!(batch_id, requests, error = %err, "Backend failed batch");
                if let BackendError::OutputMismatch { actual, .. } = &err {
                    tracing::debug!(
                        batch_id,
                        first_short_request = ?batch.origin_of(*actual),
                        "Backend output ended early"
                    );
                }
                (BatchOutcome::BackendError, Err(CoreError::Backend(err)))
            }
        };

        let abandoned = batch.fan_out(result);
        let summary = BatchSummary {
            batch_id,
            requests,
            items: expected,
            reason,
            outcome,
            latency,
            oldest_wait,
            abandoned,
            undersized,
        };
        self.events.emit(&GateEvent::BatchFlushed(summary.clone()));
        summary
    }

    async fn invoke(
        &self,
        items: Vec<String>,
        expected: usize,
    ) -> Result<Vec<Embedding>, BreakerError<BackendError>> {
        let backend = Arc::clone(&self.backend);
        let timeout = self.config.inference_timeout;

        self.breaker
            .call(|| async move {
                let embeddings = match tokio::time::timeout(timeout, backend.infer(items)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(BackendError::Timeout(timeout)),
                };
                if embeddings.len() != expected {
                    return Err(BackendError::OutputMismatch { expected, actual: embeddings.len() });
                }
                Ok::<_, BackendError>(embeddings)
            })
            .await
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}
