//! Configuration for the circuit breaker.

use std::time::Duration;

use crate::config::{env_override, env_override_millis};
use crate::error::ConfigError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio over a full window that trips the breaker (0.0-1.0].
    /// Default: 0.5
    pub failure_threshold: f64,

    /// Number of most recent outcomes considered.
    /// Default: 10
    pub window_size: usize,

    /// Time spent Open before the next call probes the backend.
    /// Default: 30 seconds
    pub open_timeout: Duration,

    /// Consecutive HalfOpen successes required to close.
    /// Default: 3
    pub half_open_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window_size: 10,
            open_timeout: Duration::from_secs(30),
            half_open_successes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Trip quickly and probe again soon
    pub fn low_latency() -> Self {
        Self {
            failure_threshold: 0.3,
            window_size: 10,
            open_timeout: Duration::from_secs(10),
            half_open_successes: 2,
        }
    }

    /// Tolerate more noise before tripping
    pub fn high_throughput() -> Self {
        Self {
            failure_threshold: 0.5,
            window_size: 50,
            open_timeout: Duration::from_secs(30),
            half_open_successes: 5,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("EMBEDGATE_BREAKER_FAILURE_THRESHOLD", &mut config.failure_threshold);
        env_override("EMBEDGATE_BREAKER_WINDOW_SIZE", &mut config.window_size);
        env_override_millis("EMBEDGATE_BREAKER_OPEN_TIMEOUT_MS", &mut config.open_timeout);
        env_override("EMBEDGATE_BREAKER_HALF_OPEN_SUCCESSES", &mut config.half_open_successes);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                format!("{} is outside (0, 1]", self.failure_threshold),
            ));
        }
        if self.window_size == 0 {
            return Err(ConfigError::invalid("circuit_breaker.window_size", "must be greater than 0"));
        }
        if self.half_open_successes == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.half_open_successes",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
