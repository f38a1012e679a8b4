//! Lock-free counters fed by gate events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::circuit_breaker::CircuitState;
use crate::error::RateLimited;
use crate::events::{BatchOutcome, EventSink, FlushReason, GateEvent};

/// Counters for monitoring admission and batching behavior
#[derive(Debug, Default)]
pub struct GateMetrics {
    /// Requests that entered the queue
    pub admitted: AtomicU64,

    pub rate_limited_global: AtomicU64,
    pub rate_limited_client: AtomicU64,
    pub shed: AtomicU64,
    pub queue_full: AtomicU64,
    pub enqueue_timeouts: AtomicU64,

    /// Callers whose end-to-end wait elapsed
    pub result_timeouts: AtomicU64,

    /// Results that found no caller waiting
    pub abandoned_results: AtomicU64,

    pub batches: AtomicU64,
    pub batches_by_size: AtomicU64,
    pub batches_by_timer: AtomicU64,
    pub batches_by_drain: AtomicU64,
    pub undersized_batches: AtomicU64,

    /// Batches the backend failed (includes timeouts and output mismatches)
    pub batch_failures: AtomicU64,

    /// Batches refused by the open breaker
    pub breaker_rejections: AtomicU64,

    pub breaker_opens: AtomicU64,
    pub breaker_closes: AtomicU64,

    /// Requests carried by all batches (for averaging)
    pub total_batch_requests: AtomicU64,

    /// Items carried by all batches (for averaging)
    pub total_batch_items: AtomicU64,

    /// Largest batch observed, in requests
    pub max_batch_requests: AtomicU64,

    /// Total backend call time in microseconds (for averaging)
    pub total_inference_us: AtomicU64,

    /// Total oldest-request wait at flush in microseconds (for averaging)
    pub total_flush_wait_us: AtomicU64,
}

impl GateMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, requests: usize, items: usize, latency: Duration, wait: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.total_batch_requests.fetch_add(requests as u64, Ordering::Relaxed);
        self.total_batch_items.fetch_add(items as u64, Ordering::Relaxed);
        self.total_inference_us.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.total_flush_wait_us.fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
        self.max_batch_requests.fetch_max(requests as u64, Ordering::Relaxed);
    }

    /// Total requests rejected before reaching the queue or at the queue
    pub fn rejected(&self) -> u64 {
        self.rate_limited_global.load(Ordering::Relaxed)
            + self.rate_limited_client.load(Ordering::Relaxed)
            + self.shed.load(Ordering::Relaxed)
            + self.queue_full.load(Ordering::Relaxed)
            + self.enqueue_timeouts.load(Ordering::Relaxed)
    }

    /// Calculate average batch size in requests
    pub fn avg_batch_size(&self) -> f64 {
        ratio(
            self.total_batch_requests.load(Ordering::Relaxed),
            self.batches.load(Ordering::Relaxed),
        )
    }

    /// Calculate average backend call time in milliseconds
    pub fn avg_inference_ms(&self) -> f64 {
        ratio(self.total_inference_us.load(Ordering::Relaxed), self.batches.load(Ordering::Relaxed))
            / 1000.0
    }

    /// Calculate average oldest-request wait at flush in milliseconds
    pub fn avg_flush_wait_ms(&self) -> f64 {
        ratio(self.total_flush_wait_us.load(Ordering::Relaxed), self.batches.load(Ordering::Relaxed))
            / 1000.0
    }

    /// Fraction of requests turned away at admission
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.rejected();
        ratio(rejected, rejected + self.admitted.load(Ordering::Relaxed))
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rate_limited_global: self.rate_limited_global.load(Ordering::Relaxed),
            rate_limited_client: self.rate_limited_client.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            enqueue_timeouts: self.enqueue_timeouts.load(Ordering::Relaxed),
            result_timeouts: self.result_timeouts.load(Ordering::Relaxed),
            abandoned_results: self.abandoned_results.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batches_by_size: self.batches_by_size.load(Ordering::Relaxed),
            batches_by_timer: self.batches_by_timer.load(Ordering::Relaxed),
            batches_by_drain: self.batches_by_drain.load(Ordering::Relaxed),
            undersized_batches: self.undersized_batches.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            breaker_opens: self.breaker_opens.load(Ordering::Relaxed),
            breaker_closes: self.breaker_closes.load(Ordering::Relaxed),
            max_batch_requests: self.max_batch_requests.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
            avg_inference_ms: self.avg_inference_ms(),
            avg_flush_wait_ms: self.avg_flush_wait_ms(),
            rejection_rate: self.rejection_rate(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.admitted,
            &self.rate_limited_global,
            &self.rate_limited_client,
            &self.shed,
            &self.queue_full,
            &self.enqueue_timeouts,
            &self.result_timeouts,
            &self.abandoned_results,
            &self.batches,
            &self.batches_by_size,
            &self.batches_by_timer,
            &self.batches_by_drain,
            &self.undersized_batches,
            &self.batch_failures,
            &self.breaker_rejections,
            &self.breaker_opens,
            &self.breaker_closes,
            &self.total_batch_requests,
            &self.total_batch_items,
            &self.max_batch_requests,
            &self.total_inference_us,
            &self.total_flush_wait_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl EventSink for GateMetrics {
    fn emit(&self, event: &GateEvent) {
        match event {
            GateEvent::Admitted { .. } => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::RateLimited { scope: RateLimited::Global } => {
                self.rate_limited_global.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::RateLimited { scope: RateLimited::Client } => {
                self.rate_limited_client.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::Shed { .. } => {
                self.shed.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::QueueFull { .. } => {
                self.queue_full.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::EnqueueTimeout { .. } => {
                self.enqueue_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::BreakerTransition { to, .. } => match to {
                CircuitState::Open => {
                    self.breaker_opens.fetch_add(1, Ordering::Relaxed);
                }
                CircuitState::Closed => {
                    self.breaker_closes.fetch_add(1, Ordering::Relaxed);
                }
                CircuitState::HalfOpen => {}
            },
            GateEvent::BreakerRejected { .. } => {
                self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
            }
            GateEvent::BatchFlushed(summary) => {
                self.record_batch(
                    summary.requests,
                    summary.items,
                    summary.latency,
                    summary.oldest_wait,
                );
                let by_reason = match summary.reason {
                    FlushReason::Size => &self.batches_by_size,
                    FlushReason::Timer => &self.batches_by_timer,
                    FlushReason::Drain => &self.batches_by_drain,
                };
                by_reason.fetch_add(1, Ordering::Relaxed);
                if summary.undersized {
                    self.undersized_batches.fetch_add(1, Ordering::Relaxed);
                }
                if summary.outcome == BatchOutcome::BackendError {
                    self.batch_failures.fetch_add(1, Ordering::Relaxed);
                }
                self.abandoned_results.fetch_add(summary.abandoned as u64, Ordering::Relaxed);
            }
            GateEvent::ResultTimeout { .. } => {
                self.result_timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rate_limited_global: u64,
    pub rate_limited_client: u64,
    pub shed: u64,
    pub queue_full: u64,
    pub enqueue_timeouts: u64,
    pub result_timeouts: u64,
    pub abandoned_results: u64,
    pub batches: u64,
    pub batches_by_size: u64,
    pub batches_by_timer: u64,
    pub batches_by_drain: u64,
    pub undersized_batches: u64,
    pub batch_failures: u64,
    pub breaker_rejections: u64,
    pub breaker_opens: u64,
    pub breaker_closes: u64,
    pub max_batch_requests: u64,
    pub avg_batch_size: f64,
    pub avg_inference_ms: f64,
    pub avg_flush_wait_ms: f64,
    pub rejection_rate: f64,
}
