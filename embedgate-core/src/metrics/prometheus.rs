//! Prometheus metrics for the admission core
//!
//! Metrics live in a process-wide registry under the `embedgate` namespace.
//! The core only produces the text encoding; serving it is left to the host
//! application.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use crate::circuit_breaker::CircuitState;
use crate::error::RateLimited;
use crate::events::{EventSink, GateEvent};
use crate::queue::QueueSnapshot;
use crate::types::Priority;

lazy_static! {
    /// Global Prometheus registry for embedgate metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Admission Metrics ==============

    /// Requests that entered the queue, by priority
    pub static ref ADMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("admitted_total", "Total requests admitted to the queue")
            .namespace("embedgate"),
        &["priority"]
    ).expect("metric can be created");

    /// Requests rejected at admission, by reason
    pub static ref REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("rejected_total", "Total requests rejected before execution")
            .namespace("embedgate"),
        &["reason"]
    ).expect("metric can be created");

    /// Callers whose end-to-end wait elapsed
    pub static ref RESULT_TIMEOUTS_TOTAL: Counter = Counter::with_opts(
        Opts::new("result_timeouts_total", "Total callers that timed out waiting for a result")
            .namespace("embedgate")
    ).expect("metric can be created");

    // ============== Queue Metrics ==============

    /// Current queue size gauge
    pub static ref QUEUE_SIZE: Gauge = Gauge::with_opts(
        Opts::new("queue_size", "Current number of requests in queue")
            .namespace("embedgate")
    ).expect("metric can be created");

    /// Queue depth per priority
    pub static ref QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new("queue_depth", "Queued requests per priority")
            .namespace("embedgate"),
        &["priority"]
    ).expect("metric can be created");

    /// Wait of the oldest request at flush time
    pub static ref QUEUE_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "queue_wait_seconds",
            "Wait of the oldest request in a batch at flush time"
        )
        .namespace("embedgate")
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).expect("metric can be created");

    // ============== Batch Metrics ==============

    /// Flushed batches by trigger and outcome
    pub static ref BATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("batches_total", "Total batches flushed")
            .namespace("embedgate"),
        &["reason", "outcome"]
    ).expect("metric can be created");

    /// Requests per batch
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size", "Requests per flushed batch")
            .namespace("embedgate")
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0])
    ).expect("metric can be created");

    /// Backend call duration
    pub static ref INFERENCE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Backend call duration in seconds"
        )
        .namespace("embedgate")
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0])
    ).expect("metric can be created");

    /// Results delivered to nobody
    pub static ref ABANDONED_RESULTS_TOTAL: Counter = Counter::with_opts(
        Opts::new("abandoned_results_total", "Total results whose caller stopped waiting")
            .namespace("embedgate")
    ).expect("metric can be created");

    // ============== Breaker Metrics ==============

    /// Breaker state (0 = closed, 1 = open, 2 = half-open)
    pub static ref BREAKER_STATE: Gauge = Gauge::with_opts(
        Opts::new("breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half_open)")
            .namespace("embedgate")
    ).expect("metric can be created");

    /// Breaker transitions by target state
    pub static ref BREAKER_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("breaker_transitions_total", "Total circuit breaker transitions")
            .namespace("embedgate"),
        &["to"]
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESULT_TIMEOUTS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(QUEUE_SIZE.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(QUEUE_WAIT_SECONDS.clone()))?;

    REGISTRY.register(Box::new(BATCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(INFERENCE_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ABANDONED_RESULTS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(BREAKER_STATE.clone()))?;
    REGISTRY.register(Box::new(BREAKER_TRANSITIONS_TOTAL.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Update queue gauges from a snapshot.
pub fn observe_queue(snapshot: &QueueSnapshot) {
    QUEUE_SIZE.set(snapshot.len as f64);
    for priority in Priority::DESCENDING {
        QUEUE_DEPTH
            .with_label_values(&[priority.as_str()])
            .set(snapshot.depths.get(priority) as f64);
    }
}

/// Set breaker state gauge.
pub fn set_breaker_state(state: CircuitState) {
    BREAKER_STATE.set(state.to_metric() as f64);
}

/// Event sink that updates the Prometheus metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl EventSink for PrometheusSink {
    fn emit(&self, event: &GateEvent) {
        match event {
            GateEvent::Admitted { priority, queue_len } => {
                ADMITTED_TOTAL.with_label_values(&[priority.as_str()]).inc();
                QUEUE_SIZE.set(*queue_len as f64);
            }
            GateEvent::RateLimited { scope } => {
                let reason = match scope {
                    RateLimited::Global => "rate_limited_global",
                    RateLimited::Client => "rate_limited_client",
                };
                REJECTED_TOTAL.with_label_values(&[reason]).inc();
            }
            GateEvent::Shed { .. } => REJECTED_TOTAL.with_label_values(&["shed"]).inc(),
            GateEvent::QueueFull { .. } => REJECTED_TOTAL.with_label_values(&["queue_full"]).inc(),
            GateEvent::EnqueueTimeout { .. } => {
                REJECTED_TOTAL.with_label_values(&["enqueue_timeout"]).inc();
            }
            GateEvent::BreakerTransition { to, .. } => {
                set_breaker_state(*to);
                BREAKER_TRANSITIONS_TOTAL.with_label_values(&[to.as_str()]).inc();
            }
            // Counted through the batch outcome label
            GateEvent::BreakerRejected { .. } => {}
            GateEvent::BatchFlushed(summary) => {
                BATCHES_TOTAL
                    .with_label_values(&[summary.reason.as_str(), summary.outcome.as_str()])
                    .inc();
                BATCH_SIZE.observe(summary.requests as f64);
                INFERENCE_DURATION_SECONDS.observe(summary.latency.as_secs_f64());
                QUEUE_WAIT_SECONDS.observe(summary.oldest_wait.as_secs_f64());
                if summary.abandoned > 0 {
                    ABANDONED_RESULTS_TOTAL.inc_by(summary.abandoned as f64);
                }
            }
            GateEvent::ResultTimeout { .. } => RESULT_TIMEOUTS_TOTAL.inc(),
        }
    }
}
