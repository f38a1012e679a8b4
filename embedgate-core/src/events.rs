//! Observability hooks.
//!
//! The core never stores or exports telemetry itself. Components emit
//! [`GateEvent`]s into an [`EventSink`]; sinks decide what to do with them
//! (log lines, atomic counters, Prometheus).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::circuit_breaker::CircuitState;
use crate::error::RateLimited;
use crate::types::Priority;

/// Why a batch was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// Ready count reached `max_batch_size`
    Size,
    /// Oldest request waited `max_wait`
    Timer,
    /// Queue closed; draining what is left
    Drain,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timer => "timer",
            FlushReason::Drain => "drain",
        }
    }
}

/// How a dispatched batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Success,
    BreakerOpen,
    BackendError,
}

impl BatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchOutcome::Success => "success",
            BatchOutcome::BreakerOpen => "breaker_open",
            BatchOutcome::BackendError => "backend_error",
        }
    }
}

/// Summary of one flushed batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: u64,
    pub requests: usize,
    pub items: usize,
    pub reason: FlushReason,
    pub outcome: BatchOutcome,
    /// Time spent inside the breaker/backend call
    pub latency: Duration,
    /// Age of the oldest request at flush time
    pub oldest_wait: Duration,
    /// Receivers that were already gone (caller timed out)
    pub abandoned: usize,
    /// Timer flush with fewer than `min_batch_size` requests
    pub undersized: bool,
}

/// Discrete events emitted by the admission core
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// Passed the rate limiter and entered the queue
    Admitted { priority: Priority, queue_len: usize },
    RateLimited { scope: RateLimited },
    Shed { priority: Priority, occupancy: f64 },
    QueueFull { capacity: usize },
    EnqueueTimeout { waited: Duration },
    BreakerTransition { from: CircuitState, to: CircuitState },
    /// Breaker refused a batch without calling the backend
    BreakerRejected { batch_id: u64 },
    BatchFlushed(BatchSummary),
    /// A caller gave up waiting for its result
    ResultTimeout { waited: Duration },
}

/// Consumer of [`GateEvent`]s. Implementations must be cheap and non-blocking;
/// they are called inline on the request and scheduler paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GateEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &GateEvent) {}
}

/// Renders events as `tracing` log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &GateEvent) {
        match event {
            GateEvent::Admitted { priority, queue_len } => {
                tracing::trace!(%priority, queue_len, "Request admitted");
            }
            GateEvent::RateLimited { scope } => {
                tracing::debug!(scope = ?scope, "Request rate limited");
            }
            GateEvent::Shed { priority, occupancy } => {
                tracing::debug!(%priority, occupancy = format!("{:.3}", occupancy), "Request shed");
            }
            GateEvent::QueueFull { capacity } => {
                tracing::warn!(capacity, "Queue full, request rejected");
            }
            GateEvent::EnqueueTimeout { waited } => {
                tracing::warn!(waited_ms = waited.as_millis() as u64, "Enqueue timed out");
            }
            GateEvent::BreakerTransition { from, to } => match to {
                CircuitState::Open => {
                    tracing::warn!(from = %from, to = %to, "Circuit breaker opened");
                }
                _ => tracing::info!(from = %from, to = %to, "Circuit breaker transition"),
            },
            GateEvent::BreakerRejected { batch_id } => {
                tracing::debug!(batch_id, "Batch rejected by open circuit breaker");
            }
            GateEvent::BatchFlushed(summary) => {
                tracing::debug!(
                    batch_id = summary.batch_id,
                    requests = summary.requests,
                    items = summary.items,
                    reason = summary.reason.as_str(),
                    outcome = summary.outcome.as_str(),
                    latency_ms = summary.latency.as_millis() as u64,
                    oldest_wait_ms = summary.oldest_wait.as_millis() as u64,
                    abandoned = summary.abandoned,
                    undersized = summary.undersized,
                    "Batch flushed"
                );
            }
            GateEvent::ResultTimeout { waited } => {
                tracing::debug!(waited_ms = waited.as_millis() as u64, "Caller timed out waiting");
            }
        }
    }
}

/// Forwards each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &GateEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Collects events in memory. Handy for tests and scenario reports.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<GateEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GateEvent> {
        self.events.lock().clone()
    }

    /// All breaker transitions seen so far, in order
    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                GateEvent::BreakerTransition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// All flushed batch summaries, in order
    pub fn batches(&self) -> Vec<BatchSummary> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                GateEvent::BatchFlushed(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &GateEvent) {
        self.events.lock().push(event.clone());
    }
}
