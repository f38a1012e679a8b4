// embedgate Core Library
//
// Admission control and dynamic batching in front of a batched embedding
// inference backend: rate limiting, load shedding, circuit breaking and
// size/timer-triggered batch scheduling.

pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod metrics;
pub mod queue;
pub mod rate_limiter;
pub mod scheduler;
pub mod types;

pub use backend::{InferenceBackend, MockBackend};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::GateConfig;
pub use error::{BackendError, BreakerError, ConfigError, CoreError, QueueError, RateLimited};
pub use events::{EventSink, GateEvent};
pub use gate::{Gate, GateBuilder, GateHealth};
pub use queue::{BackpressureQueue, QueueConfig};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::{Embedding, InferenceOutput, Payload, Priority};

/// Initialize Prometheus metrics registry.
/// Should be called once before metrics are scraped.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        tracing::warn!("Failed to register Prometheus metrics: {}", e);
    }
}
