//! Aggregate configuration for a [`Gate`](crate::gate::Gate).
//!
//! Every component owns its own `*Config` with `Default`, `low_latency()`,
//! `high_throughput()` and `from_env()`. [`GateConfig`] bundles them and
//! checks cross-component constraints in [`GateConfig::validate`].
//!
//! Environment variables (all optional, unparsable values are ignored):
//!
//! | Variable | Field |
//! |----------|-------|
//! | `EMBEDGATE_GLOBAL_RPS` / `EMBEDGATE_GLOBAL_BURST` | global bucket |
//! | `EMBEDGATE_CLIENT_RPS` / `EMBEDGATE_CLIENT_BURST` | per-client bucket |
//! | `EMBEDGATE_BREAKER_*` | circuit breaker |
//! | `EMBEDGATE_QUEUE_*` | backpressure queue |
//! | `EMBEDGATE_MAX_BATCH_SIZE`, `EMBEDGATE_MAX_WAIT_MS`, ... | scheduler |

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::queue::QueueConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::scheduler::SchedulerConfig;

/// Configuration for every component of the admission core
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateConfig {
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

impl GateConfig {
    /// Small batches and short waits (single user, interactive)
    pub fn low_latency() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::low_latency(),
            circuit_breaker: CircuitBreakerConfig::low_latency(),
            queue: QueueConfig::low_latency(),
            scheduler: SchedulerConfig::low_latency(),
        }
    }

    /// Large batches and deep queues (many concurrent clients)
    pub fn high_throughput() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::high_throughput(),
            circuit_breaker: CircuitBreakerConfig::high_throughput(),
            queue: QueueConfig::high_throughput(),
            scheduler: SchedulerConfig::high_throughput(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            queue: QueueConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }

    /// Resolve a preset by name (`default`, `low-latency`, `high-throughput`)
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "low-latency" | "low_latency" => Some(Self::low_latency()),
            "high-throughput" | "high_throughput" => Some(Self::high_throughput()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()?;
        self.queue.validate()?;
        self.scheduler.validate()?;

        if self.scheduler.max_batch_size > self.queue.capacity {
            return Err(ConfigError::invalid(
                "scheduler.max_batch_size",
                format!(
                    "{} exceeds queue capacity {}",
                    self.scheduler.max_batch_size, self.queue.capacity
                ),
            ));
        }
        Ok(())
    }

    /// Flat, serializable view for printing
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            rate_limiter: RateLimiterSummary {
                global_rps: self.rate_limiter.global_rps,
                global_burst: self.rate_limiter.global_burst,
                client_rps: self.rate_limiter.client_rps,
                client_burst: self.rate_limiter.client_burst,
                max_tracked_clients: self.rate_limiter.max_tracked_clients,
            },
            circuit_breaker: BreakerSummary {
                failure_threshold: self.circuit_breaker.failure_threshold,
                window_size: self.circuit_breaker.window_size,
                open_timeout_ms: millis(self.circuit_breaker.open_timeout),
                half_open_successes: self.circuit_breaker.half_open_successes,
            },
            queue: QueueSummary {
                capacity: self.queue.capacity,
                shed_threshold: self.queue.shed_threshold,
                enqueue_timeout_ms: millis(self.queue.enqueue_timeout),
            },
            scheduler: SchedulerSummary {
                max_batch_size: self.scheduler.max_batch_size,
                min_batch_size: self.scheduler.min_batch_size,
                max_wait_ms: millis(self.scheduler.max_wait),
                end_to_end_timeout_ms: millis(self.scheduler.end_to_end_timeout),
                workers: self.scheduler.workers,
                dequeue_wait_ms: millis(self.scheduler.dequeue_wait),
                inference_timeout_ms: millis(self.scheduler.inference_timeout),
                max_items_per_request: self.scheduler.max_items_per_request,
            },
        }
    }
}

/// Serializable configuration using millisecond fields
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub rate_limiter: RateLimiterSummary,
    pub circuit_breaker: BreakerSummary,
    pub queue: QueueSummary,
    pub scheduler: SchedulerSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSummary {
    pub global_rps: f64,
    pub global_burst: f64,
    pub client_rps: f64,
    pub client_burst: f64,
    pub max_tracked_clients: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSummary {
    pub failure_threshold: f64,
    pub window_size: usize,
    pub open_timeout_ms: u64,
    pub half_open_successes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub capacity: usize,
    pub shed_threshold: f64,
    pub enqueue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSummary {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub max_wait_ms: u64,
    pub end_to_end_timeout_ms: u64,
    pub workers: usize,
    pub dequeue_wait_ms: u64,
    pub inference_timeout_ms: u64,
    pub max_items_per_request: usize,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Overwrite `target` when `name` is set and parses
pub(crate) fn env_override<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

/// Same as [`env_override`] for durations given in milliseconds
pub(crate) fn env_override_millis(name: &str, target: &mut Duration) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(ms) = val.parse::<u64>() {
            *target = Duration::from_millis(ms);
        }
    }
}

pub(crate) fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be a positive number")))
    }
}
