//! Continuous-refill token bucket.

use tokio::time::Instant;

/// A token bucket refilled continuously from elapsed wall-clock time.
///
/// All methods take `now` explicitly so the limiter can evaluate both scopes
/// against the same instant.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self { capacity, tokens: capacity, refill_rate, last_refill: now }
    }

    /// Add `elapsed * rate` tokens, capped at capacity
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Refill, then report whether at least `cost` tokens are available
    pub fn has(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= cost
    }

    /// Remove `cost` tokens. Callers check [`has`](Self::has) first.
    pub fn consume(&mut self, cost: f64) {
        self.tokens = (self.tokens - cost).max(0.0);
    }

    /// Refill and consume in one step; false leaves the bucket untouched
    pub fn try_consume(&mut self, cost: f64, now: Instant) -> bool {
        if self.has(cost, now) {
            self.consume(cost);
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// True once the bucket has refilled completely; such a bucket carries
    /// no state a freshly created one would not have.
    pub fn is_full(&self) -> bool {
        self.tokens >= self.capacity
    }
}
