//! Configuration for the backpressure queue.

use std::time::Duration;

use crate::config::{env_override, env_override_millis};
use crate::error::ConfigError;

/// Configuration for the backpressure queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of queued requests
    pub capacity: usize,

    /// Occupancy fraction at which priorities below `High` are shed
    pub shed_threshold: f64,

    /// Maximum time an enqueue may wait on the queue lock
    pub enqueue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            shed_threshold: 0.95,
            enqueue_timeout: Duration::from_millis(100),
        }
    }
}

impl QueueConfig {
    /// Shallow queue that sheds early instead of building latency
    pub fn low_latency() -> Self {
        Self {
            capacity: 200,
            shed_threshold: 0.8,
            enqueue_timeout: Duration::from_millis(20),
        }
    }

    /// Deep queue to absorb bursts
    pub fn high_throughput() -> Self {
        Self {
            capacity: 10_000,
            shed_threshold: 0.95,
            enqueue_timeout: Duration::from_millis(250),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("EMBEDGATE_QUEUE_CAPACITY", &mut config.capacity);
        env_override("EMBEDGATE_QUEUE_SHED_THRESHOLD", &mut config.shed_threshold);
        env_override_millis("EMBEDGATE_QUEUE_ENQUEUE_TIMEOUT_MS", &mut config.enqueue_timeout);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("queue.capacity", "must be greater than 0"));
        }
        if !(self.shed_threshold > 0.0 && self.shed_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "queue.shed_threshold",
                format!("{} is outside (0, 1]", self.shed_threshold),
            ));
        }
        if self.enqueue_timeout.is_zero() {
            return Err(ConfigError::invalid("queue.enqueue_timeout", "must be greater than 0"));
        }
        Ok(())
    }
}
