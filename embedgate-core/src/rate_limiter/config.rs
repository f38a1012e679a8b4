//! Configuration for the token-bucket rate limiter.

use crate::config::{env_override, positive};
use crate::error::ConfigError;

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Global refill rate (requests per second across all clients)
    pub global_rps: f64,

    /// Global bucket capacity
    pub global_burst: f64,

    /// Per-client refill rate
    pub client_rps: f64,

    /// Per-client bucket capacity
    pub client_burst: f64,

    /// Maximum number of client buckets kept in memory (LRU evicted)
    pub max_tracked_clients: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            // Global scope is 10x the per-client rate
            global_rps: 1000.0,
            global_burst: 2000.0,
            client_rps: 100.0,
            client_burst: 200.0,
            max_tracked_clients: 10_000,
        }
    }
}

impl RateLimiterConfig {
    /// Tight limits for a single-tenant, latency-sensitive deployment
    pub fn low_latency() -> Self {
        Self {
            global_rps: 200.0,
            global_burst: 200.0,
            client_rps: 50.0,
            client_burst: 50.0,
            max_tracked_clients: 1_000,
        }
    }

    /// Generous limits for many concurrent clients
    pub fn high_throughput() -> Self {
        Self {
            global_rps: 10_000.0,
            global_burst: 20_000.0,
            client_rps: 1_000.0,
            client_burst: 2_000.0,
            max_tracked_clients: 100_000,
        }
    }

    /// Limits that never reject in practice (tests, trusted callers)
    pub fn unlimited() -> Self {
        Self {
            global_rps: 1e9,
            global_burst: 1e9,
            client_rps: 1e9,
            client_burst: 1e9,
            max_tracked_clients: 10_000,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("EMBEDGATE_GLOBAL_RPS", &mut config.global_rps);
        env_override("EMBEDGATE_GLOBAL_BURST", &mut config.global_burst);
        env_override("EMBEDGATE_CLIENT_RPS", &mut config.client_rps);
        env_override("EMBEDGATE_CLIENT_BURST", &mut config.client_burst);
        env_override("EMBEDGATE_MAX_TRACKED_CLIENTS", &mut config.max_tracked_clients);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("rate_limiter.global_rps", self.global_rps)?;
        positive("rate_limiter.client_rps", self.client_rps)?;
        if self.global_burst < 1.0 {
            return Err(ConfigError::invalid("rate_limiter.global_burst", "must be at least 1"));
        }
        if self.client_burst < 1.0 {
            return Err(ConfigError::invalid("rate_limiter.client_burst", "must be at least 1"));
        }
        if self.max_tracked_clients == 0 {
            return Err(ConfigError::invalid(
                "rate_limiter.max_tracked_clients",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
