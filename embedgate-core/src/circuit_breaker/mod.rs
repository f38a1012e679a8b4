//! Circuit breaker protecting the inference backend.
//!
//! # States
//!
//! - **Closed:** normal operation, calls pass through
//! - **Open:** backend assumed unhealthy, calls fail fast without running
//! - **HalfOpen:** probing recovery, a limited number of calls pass through
//!
//! # Transitions
//!
//! ```text
//! Closed   → Open:     window full and failure ratio >= failure_threshold
//! Open     → HalfOpen: next call after open_timeout
//! HalfOpen → Closed:   half_open_successes consecutive successes (window reset)
//! HalfOpen → Open:     any failure (open timer restarts)
//! ```
//!
//! Every transition is emitted as a [`GateEvent::BreakerTransition`]. The
//! breaker itself keeps no monitoring state beyond what the transitions need.
//!
//! # Example
//!
//! ```rust
//! use embedgate_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let result: Result<u32, _> = breaker.call_sync(|| Ok::<_, String>(42));
//! assert_eq!(result.unwrap(), 42);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! ```

mod config;
mod window;

pub use config::CircuitBreakerConfig;
pub use window::Outcome;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::BreakerError;
use crate::events::{EventSink, GateEvent, NoopSink};
use window::OutcomeWindow;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,

    /// Tripped, calls rejected without touching the backend.
    Open,

    /// Testing recovery, limited calls allowed.
    HalfOpen,
}

impl CircuitState {
    /// Numeric value for gauges: 0 = Closed, 1 = Open, 2 = HalfOpen
    #[must_use]
    pub fn to_metric(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub window_len: usize,
    pub window_failures: usize,
    pub failure_rate: f64,
    pub half_open_successes: u32,
    /// Time spent in the current Open period, if open
    pub open_for: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: OutcomeWindow,
    /// Consecutive successes while HalfOpen
    half_open_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    /// Bumped on every transition; outcomes from older generations are dropped
    generation: u64,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState, now: Instant) -> (CircuitState, CircuitState) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.half_open_successes = 0;
        self.probes_in_flight = 0;
        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                self.opened_at = None;
                self.window.clear();
            }
        }
        (from, to)
    }
}

/// Permission to run one call through the breaker.
///
/// Settle it with [`record`](Self::record). A permit dropped unsettled (the
/// call was cancelled) records nothing and frees its probe slot.
#[must_use = "a permit must be settled with record()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a HalfOpen recovery probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, outcome);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Circuit breaker with a count-based sliding window.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in Closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_events(config, Arc::new(NoopSink))
    }

    /// Create a breaker that reports transitions to `events`
    #[must_use]
    pub fn with_events(config: CircuitBreakerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: OutcomeWindow::new(config.window_size.max(1)),
                half_open_successes: 0,
                probes_in_flight: 0,
                opened_at: None,
                generation: 0,
            }),
            config,
            events,
        }
    }

    /// Current state. Reading does not move Open to HalfOpen; only a call does.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failure ratio over the current window (0.0 when empty)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        self.inner.lock().window.failure_rate()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            window_len: inner.window.len(),
            window_failures: inner.window.failures(),
            failure_rate: inner.window.failure_rate(),
            half_open_successes: inner.half_open_successes,
            open_for: inner.opened_at.map(|at| at.elapsed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask to run one call. `None` means the breaker is open (or HalfOpen with
    /// every probe slot taken) and the work must not run.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let now = Instant::now();
        let mut transition = None;

        let admitted = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Some((inner.generation, false)),
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or(Duration::MAX);
                    if elapsed >= self.config.open_timeout {
                        transition = Some(inner.transition(CircuitState::HalfOpen, now));
                        inner.probes_in_flight = 1;
                        Some((inner.generation, true))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probes_in_flight < self.config.half_open_successes {
                        inner.probes_in_flight += 1;
                        Some((inner.generation, true))
                    } else {
                        None
                    }
                }
            }
        };

        self.emit_transition(transition);
        admitted.map(|(generation, probe)| CallPermit {
            breaker: self,
            generation,
            probe,
            settled: false,
        })
    }

    /// Run async `work` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without polling `work` when the breaker
    /// refuses the call.
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Open)?;
        let result = work().await;
        permit.record(Outcome::from_result(&result));
        result.map_err(BreakerError::Inner)
    }

    /// Synchronous variant of [`call`](Self::call)
    pub fn call_sync<F, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Open)?;
        let result = work();
        permit.record(Outcome::from_result(&result));
        result.map_err(BreakerError::Inner)
    }

    /// Force transition to Closed state (manual reset).
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let t = inner.transition(CircuitState::Closed, Instant::now());
            (t.0 != t.1).then_some(t)
        };
        tracing::info!("Circuit breaker manually reset to Closed");
        self.emit_transition(transition);
    }

    fn settle(&self, generation: u64, probe: bool, outcome: Outcome) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                // Admitted under a state that has since been left
                tracing::trace!(?outcome, "Discarding outcome from a previous breaker state");
                return;
            }
            if probe {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
            inner.window.record(outcome);

            match (inner.state, outcome) {
                (CircuitState::Closed, _) => {
                    let rate = inner.window.failure_rate();
                    if inner.window.is_full() && rate >= self.config.failure_threshold {
                        tracing::warn!(
                            "Circuit breaker tripping: failure_rate={:.2}%, threshold={:.2}%",
                            rate * 100.0,
                            self.config.failure_threshold * 100.0
                        );
                        Some(inner.transition(CircuitState::Open, now))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, Outcome::Success) => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_successes {
                        tracing::info!(
                            "Circuit breaker closing after {} consecutive successes",
                            inner.half_open_successes
                        );
                        Some(inner.transition(CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, Outcome::Failure) => {
                    tracing::warn!("Circuit breaker failure during HalfOpen, reopening");
                    Some(inner.transition(CircuitState::Open, now))
                }
                (CircuitState::Open, _) => None,
            }
        };
        self.emit_transition(transition);
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    fn emit_transition(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            self.events.emit(&GateEvent::BreakerTransition { from, to });
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            window_size: 10,
            open_timeout: Duration::from_secs(30),
            half_open_successes: 3,
        }
    }

    fn succeed(cb: &CircuitBreaker) {
        let _ = cb.call_sync(|| Ok::<_, String>(()));
    }

    fn fail(cb: &CircuitBreaker) {
        let _ = cb.call_sync(|| Err::<(), _>("boom".to_string()));
    }

    fn open_breaker(cb: &CircuitBreaker) {
        for _ in 0..10 {
            fail(cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_tenth_outcome_not_before() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..5 {
            succeed(&cb);
        }
        for _ in 0..4 {
            fail(&cb);
            assert_eq!(cb.state(), CircuitState::Closed);
        }

        // 10th outcome fills the window at exactly 50% failures
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_not_evaluated_until_full() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..9 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_rate(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new(test_config());

        for _ in 0..6 {
            succeed(&cb);
        }
        for _ in 0..4 {
            fail(&cb);
        }
        assert!((cb.failure_rate() - 0.4).abs() < 0.01);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking_work() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);

        let invoked = AtomicU32::new(0);
        for _ in 0..20 {
            let result = cb.call_sync(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            });
            assert_eq!(result, Err(BreakerError::Open));
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);

        tokio::time::advance(Duration::from_secs(30)).await;
        // Reading state alone does not transition
        assert_eq!(cb.state(), CircuitState::Open);

        let permit = cb.try_acquire().expect("probe allowed after timeout");
        assert!(permit.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        permit.record(Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_to_closed() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        for _ in 0..2 {
            succeed(&cb);
            assert_eq!(cb.state(), CircuitState::HalfOpen);
        }
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Window was reset on closing
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.window_len, 0);
        assert_eq!(snapshot.open_for, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_failure_reopens() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        succeed(&cb);
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // Open timer restarted
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cb.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_probes() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        let p1 = cb.try_acquire().unwrap();
        let p2 = cb.try_acquire().unwrap();
        let p3 = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_none());

        // Dropping an unsettled permit frees its slot without recording
        drop(p3);
        let p4 = cb.try_acquire().unwrap();
        assert_eq!(cb.snapshot().half_open_successes, 0);

        p1.record(Outcome::Success);
        p2.record(Outcome::Success);
        p4.record(Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_is_discarded() {
        let cb = CircuitBreaker::new(test_config());

        let straggler = cb.try_acquire().unwrap();
        open_breaker(&cb);

        // A Closed-era call finishing after the trip must not touch the Open state
        straggler.record(Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().window_len, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_call() {
        let cb = CircuitBreaker::new(test_config());

        let ok: Result<u32, BreakerError<String>> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, BreakerError<String>> =
            cb.call(|| async { Err("backend down".to_string()) }).await;
        assert_eq!(err, Err(BreakerError::Inner("backend down".to_string())));
        assert_eq!(cb.snapshot().window_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_emitted() {
        let sink = Arc::new(RecordingSink::new());
        let cb = CircuitBreaker::with_events(test_config(), sink.clone());

        open_breaker(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..3 {
            succeed(&cb);
        }

        assert_eq!(
            sink.transitions(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset() {
        let cb = CircuitBreaker::new(test_config());
        open_breaker(&cb);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_rate(), 0.0);
    }

    #[test]
    fn test_state_metric_values() {
        assert_eq!(CircuitState::Closed.to_metric(), 0);
        assert_eq!(CircuitState::Open.to_metric(), 1);
        assert_eq!(CircuitState::HalfOpen.to_metric(), 2);
    }
}
