//! Configuration for the batch scheduler.

use std::time::Duration;

use crate::config::{env_override, env_override_millis};
use crate::error::ConfigError;

/// Configuration for the batch scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Flush as soon as this many requests are ready
    pub max_batch_size: usize,

    /// Batches flushed by the timer below this size are reported as
    /// undersized (they are still flushed)
    pub min_batch_size: usize,

    /// Longest time the oldest request in a forming batch may wait
    pub max_wait: Duration,

    /// Caller's overall wait budget in `Gate::submit`
    pub end_to_end_timeout: Duration,

    /// Number of scheduler loops draining the queue
    pub workers: usize,

    /// Idle wait per cycle before a worker re-checks for shutdown
    pub dequeue_wait: Duration,

    /// Upper bound on a single backend call
    pub inference_timeout: Duration,

    /// Largest number of text items accepted in one request
    pub max_items_per_request: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            min_batch_size: 2,
            max_wait: Duration::from_millis(10),
            end_to_end_timeout: Duration::from_millis(100),
            workers: 1,
            dequeue_wait: Duration::from_millis(50),
            inference_timeout: Duration::from_secs(5),
            max_items_per_request: 256,
        }
    }
}

impl SchedulerConfig {
    /// Flush almost immediately
    pub fn low_latency() -> Self {
        Self {
            max_batch_size: 8,
            min_batch_size: 1,
            max_wait: Duration::from_millis(2),
            end_to_end_timeout: Duration::from_millis(50),
            workers: 1,
            dequeue_wait: Duration::from_millis(20),
            inference_timeout: Duration::from_secs(2),
            max_items_per_request: 64,
        }
    }

    /// Larger batches, longer windows, two workers
    pub fn high_throughput() -> Self {
        Self {
            max_batch_size: 128,
            min_batch_size: 8,
            max_wait: Duration::from_millis(25),
            end_to_end_timeout: Duration::from_millis(500),
            workers: 2,
            dequeue_wait: Duration::from_millis(50),
            inference_timeout: Duration::from_secs(10),
            max_items_per_request: 1024,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("EMBEDGATE_MAX_BATCH_SIZE", &mut config.max_batch_size);
        env_override("EMBEDGATE_MIN_BATCH_SIZE", &mut config.min_batch_size);
        env_override_millis("EMBEDGATE_MAX_WAIT_MS", &mut config.max_wait);
        env_override_millis("EMBEDGATE_END_TO_END_TIMEOUT_MS", &mut config.end_to_end_timeout);
        env_override("EMBEDGATE_WORKERS", &mut config.workers);
        env_override_millis("EMBEDGATE_DEQUEUE_WAIT_MS", &mut config.dequeue_wait);
        env_override_millis("EMBEDGATE_INFERENCE_TIMEOUT_MS", &mut config.inference_timeout);
        env_override("EMBEDGATE_MAX_ITEMS_PER_REQUEST", &mut config.max_items_per_request);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("scheduler.max_batch_size", "must be greater than 0"));
        }
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(ConfigError::invalid(
                "scheduler.min_batch_size",
                format!("{} is outside 1..={}", self.min_batch_size, self.max_batch_size),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("scheduler.workers", "must be greater than 0"));
        }
        if self.end_to_end_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "scheduler.end_to_end_timeout",
                "must be greater than 0",
            ));
        }
        if self.dequeue_wait.is_zero() {
            return Err(ConfigError::invalid("scheduler.dequeue_wait", "must be greater than 0"));
        }
        if self.inference_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "scheduler.inference_timeout",
                "must be greater than 0",
            ));
        }
        if self.max_items_per_request == 0 {
            return Err(ConfigError::invalid(
                "scheduler.max_items_per_request",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
