//! Error types for the embedgate admission core
//!
//! Each component owns a small `thiserror` enum; [`CoreError`] is what a
//! caller of [`Gate::submit`](crate::gate::Gate::submit) sees.
//!
//! # Error Hierarchy
//!
//! ```text
//! CoreError (returned by Gate::submit)
//! ├── RateLimited     - rejected by the token buckets (never attempted)
//! ├── QueueError      - shed / full / enqueue timeout / closed (never attempted)
//! ├── BreakerOpen     - backend unhealthy, batch failed fast (attempted)
//! ├── BackendError    - inference engine failed for the batch (attempted)
//! └── ResultTimeout   - caller's own wait budget elapsed (unknown outcome)
//! ```
//!
//! Application code (CLI, load runner) wraps these with `anyhow`:
//!
//! ```rust,ignore
//! use anyhow::Context;
//!
//! let output = gate.submit(payload, "client-a", Priority::Normal)
//!     .await
//!     .context("embedding request failed")?;
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::types::Priority;

/// Which token bucket rejected a request
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimited {
    /// Global bucket exhausted
    #[error("global rate limit exceeded")]
    Global,

    /// The client's own bucket exhausted
    #[error("client rate limit exceeded")]
    Client,
}

/// Errors from the backpressure queue
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Occupancy above the shed threshold and priority below `High`
    #[error("request shed at {:.1}% occupancy (priority {priority})", .occupancy * 100.0)]
    Shed { priority: Priority, occupancy: f64 },

    /// Queue at capacity
    #[error("queue is full (capacity: {capacity})")]
    Full { capacity: usize },

    /// Could not get into the queue within the enqueue timeout
    #[error("enqueue timed out after {waited:?}")]
    Timeout { waited: Duration },

    /// Queue closed for shutdown
    #[error("queue is closed")]
    Closed,
}

/// Error returned by [`CircuitBreaker::call`](crate::circuit_breaker::CircuitBreaker::call)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// Breaker is open; the work was not invoked
    #[error("circuit breaker is open")]
    Open,

    /// The work ran and failed
    #[error(transparent)]
    Inner(E),
}

/// Errors reported by the inference backend for a whole batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Backend not reachable or not ready
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected or failed the batch
    #[error("inference failed: {0}")]
    Inference(String),

    /// Backend returned a different number of outputs than inputs
    #[error("backend returned {actual} outputs for {expected} inputs")]
    OutputMismatch { expected: usize, actual: usize },

    /// Backend call exceeded the inference timeout
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an inference failure
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Errors surfaced to callers of the ingress entry point
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("rate limited: {0}")]
    RateLimited(#[from] RateLimited),

    #[error("request shed under load (priority {priority})")]
    Shed { priority: Priority },

    #[error("queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("enqueue timed out")]
    EnqueueTimeout,

    /// Batch failed fast because the circuit breaker is open
    #[error("backend unavailable: circuit breaker open")]
    BreakerOpen,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Caller's end-to-end wait elapsed; the request may still execute
    #[error("timed out waiting for result after {0:?}")]
    ResultTimeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("gate is shutting down")]
    ShuttingDown,

    /// Result channel dropped without a value
    #[error("request cancelled before a result was produced")]
    Cancelled,
}

/// Whether a failed request reached the inference backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempted {
    /// Rejected before committing any resources
    No,
    /// Reached the execution stage (breaker or backend)
    Yes,
    /// Caller stopped waiting; outcome unknown
    Unknown,
}

/// Retry guidance for clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Retrying the same request will not help
    Never,
    /// Retry after roughly this long
    After(Duration),
}

impl CoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Distinguishes "never attempted" from "attempted but failed"
    pub fn attempted(&self) -> Attempted {
        match self {
            CoreError::RateLimited(_)
            | CoreError::Shed { .. }
            | CoreError::QueueFull { .. }
            | CoreError::EnqueueTimeout
            | CoreError::InvalidInput(_)
            | CoreError::ShuttingDown => Attempted::No,
            CoreError::BreakerOpen | CoreError::Backend(_) => Attempted::Yes,
            CoreError::ResultTimeout(_) | CoreError::Cancelled => Attempted::Unknown,
        }
    }

    /// Suggested client backoff. Breaker-open backs off much longer than
    /// queue rejection.
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            CoreError::InvalidInput(_) | CoreError::ShuttingDown => RetryHint::Never,
            CoreError::RateLimited(_) => RetryHint::After(Duration::from_secs(1)),
            CoreError::Shed { .. } | CoreError::QueueFull { .. } | CoreError::EnqueueTimeout => {
                RetryHint::After(Duration::from_millis(250))
            }
            CoreError::BreakerOpen => RetryHint::After(Duration::from_secs(10)),
            CoreError::Backend(_) => RetryHint::After(Duration::from_secs(2)),
            CoreError::ResultTimeout(_) | CoreError::Cancelled => {
                RetryHint::After(Duration::from_millis(500))
            }
        }
    }

    /// Short machine-readable label, used for metrics and reports
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::RateLimited(RateLimited::Global) => "rate_limited_global",
            CoreError::RateLimited(RateLimited::Client) => "rate_limited_client",
            CoreError::Shed { .. } => "shed",
            CoreError::QueueFull { .. } => "queue_full",
            CoreError::EnqueueTimeout => "enqueue_timeout",
            CoreError::BreakerOpen => "breaker_open",
            CoreError::Backend(_) => "backend_error",
            CoreError::ResultTimeout(_) => "result_timeout",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::ShuttingDown => "shutting_down",
            CoreError::Cancelled => "cancelled",
        }
    }
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Shed { priority, .. } => CoreError::Shed { priority },
            QueueError::Full { capacity } => CoreError::QueueFull { capacity },
            QueueError::Timeout { .. } => CoreError::EnqueueTimeout,
            QueueError::Closed => CoreError::ShuttingDown,
        }
    }
}

impl From<BreakerError<BackendError>> for CoreError {
    fn from(err: BreakerError<BackendError>) -> Self {
        match err {
            BreakerError::Open => CoreError::BreakerOpen,
            BreakerError::Inner(inner) => CoreError::Backend(inner),
        }
    }
}
