//! Dual-scope token-bucket rate limiter.
//!
//! Every request is checked against a **global** bucket shared by all clients
//! and a **per-client** bucket keyed by client identifier. Admission is
//! all-or-nothing: a request either takes one token from both buckets or
//! takes nothing.
//!
//! ```text
//!   admit("client-a")
//!        │
//!   ┌────▼─────┐  empty  ┌──────────────────────┐
//!   │  global  ├────────►│ RateLimited::Global  │
//!   └────┬─────┘         └──────────────────────┘
//!        │ ≥ 1 token
//!   ┌────▼─────┐  empty  ┌──────────────────────┐
//!   │  client  ├────────►│ RateLimited::Client  │
//!   └────┬─────┘         └──────────────────────┘
//!        │ ≥ 1 token
//!   consume 1 from both → Ok(())
//! ```
//!
//! Client buckets live in an LRU map capped at `max_tracked_clients`. When a
//! new client arrives at the cap, the least recently seen bucket that has
//! fully refilled is evicted, so the returning client loses nothing. Only if
//! every tracked bucket is still depleted does plain LRU eviction apply, and
//! that client may then get a fresh burst early.

mod bucket;
mod config;

pub use bucket::TokenBucket;
pub use config::RateLimiterConfig;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::RateLimited;

const COST: f64 = 1.0;

/// Global + per-client token-bucket limiter
pub struct RateLimiter {
    config: RateLimiterConfig,
    global: Mutex<TokenBucket>,
    clients: Mutex<LruCache<String, TokenBucket>>,
    evicted_clients: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let now = Instant::now();
        let capacity = NonZeroUsize::new(config.max_tracked_clients.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            global: Mutex::new(TokenBucket::new(config.global_burst, config.global_rps, now)),
            clients: Mutex::new(LruCache::new(capacity)),
            evicted_clients: AtomicU64::new(0),
            config,
        }
    }

    /// Admit or reject one request for `client_id`.
    ///
    /// The global bucket is checked first so a global exhaustion always
    /// surfaces as [`RateLimited::Global`]. Never blocks.
    pub fn admit(&self, client_id: &str) -> Result<(), RateLimited> {
        self.admit_at(client_id, Instant::now())
    }

    pub(crate) fn admit_at(&self, client_id: &str, now: Instant) -> Result<(), RateLimited> {
        // Lock order: global, then clients
        let mut global = self.global.lock();
        if !global.has(COST, now) {
            return Err(RateLimited::Global);
        }

        let mut clients = self.clients.lock();
        if !clients.contains(client_id) && clients.len() == clients.cap().get() {
            let idle = clients.iter_mut().rev().find_map(|(id, bucket)| {
                bucket.refill(now);
                bucket.is_full().then(|| id.clone())
            });
            match idle {
                Some(idle) => {
                    clients.pop(&idle);
                    tracing::debug!(client_id, evicted = %idle, "Evicting idle client bucket");
                }
                None => {
                    clients.pop_lru();
                    tracing::debug!(client_id, "Evicting least recently seen client bucket");
                }
            }
            self.evicted_clients.fetch_add(1, Ordering::Relaxed);
        }
        let client = clients.get_or_insert_mut(client_id.to_owned(), || {
            TokenBucket::new(self.config.client_burst, self.config.client_rps, now)
        });
        if !client.has(COST, now) {
            return Err(RateLimited::Client);
        }

        client.consume(COST);
        global.consume(COST);
        Ok(())
    }

    /// Tokens currently available in the global bucket
    pub fn global_available(&self) -> f64 {
        let mut global = self.global.lock();
        global.refill(Instant::now());
        global.tokens()
    }

    /// Tokens currently available to `client_id` (full burst if unseen)
    pub fn available_tokens(&self, client_id: &str) -> f64 {
        let mut clients = self.clients.lock();
        match clients.peek_mut(client_id) {
            Some(bucket) => {
                bucket.refill(Instant::now());
                bucket.tokens()
            }
            None => self.config.client_burst,
        }
    }

    /// Number of client buckets currently held
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Number of client buckets evicted by the LRU bound
    pub fn evicted_clients(&self) -> u64 {
        self.evicted_clients.load(Ordering::Relaxed)
    }

    /// Drop client buckets that have refilled completely. Returns how many
    /// were removed.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let mut idle = Vec::new();
        for (client_id, bucket) in clients.iter_mut() {
            bucket.refill(now);
            if bucket.is_full() {
                idle.push(client_id.clone());
            }
        }
        for client_id in &idle {
            clients.pop(client_id);
        }
        idle.len()
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config(global: f64, client: f64) -> RateLimiterConfig {
        RateLimiterConfig {
            global_rps: global,
            global_burst: global,
            client_rps: client,
            client_burst: client,
            max_tracked_clients: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_limit() {
        let limiter = RateLimiter::new(config(100.0, 3.0));

        for _ in 0..3 {
            assert!(limiter.admit("a").is_ok());
        }
        assert_eq!(limiter.admit("a"), Err(RateLimited::Client));

        // Other clients are unaffected
        assert!(limiter.admit("b").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_checked_first() {
        let limiter = RateLimiter::new(config(2.0, 5.0));

        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("b").is_ok());
        // Fresh client with a full bucket still sees the global rejection
        assert_eq!(limiter.admit("c"), Err(RateLimited::Global));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_rejection_does_not_consume_global() {
        let limiter = RateLimiter::new(config(10.0, 1.0));

        assert!(limiter.admit("a").is_ok());
        let global_before = limiter.global_available();

        for _ in 0..5 {
            assert_eq!(limiter.admit("a"), Err(RateLimited::Client));
        }
        assert_eq!(limiter.global_available(), global_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_rejection_does_not_consume_client() {
        let limiter = RateLimiter::new(config(1.0, 5.0));

        assert!(limiter.admit("a").is_ok());
        assert_eq!(limiter.available_tokens("a"), 4.0);

        assert_eq!(limiter.admit("a"), Err(RateLimited::Global));
        assert_eq!(limiter.available_tokens("a"), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_refill() {
        let limiter = RateLimiter::new(config(100.0, 10.0));

        for _ in 0..10 {
            assert!(limiter.admit("a").is_ok());
        }
        assert!(limiter.admit("a").is_err());

        // 10 tokens/s: 250ms refills 2.5 tokens
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("a").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_bounds_client_map() {
        let mut cfg = config(1000.0, 5.0);
        cfg.max_tracked_clients = 3;
        let limiter = RateLimiter::new(cfg);

        for client in ["a", "b", "c", "d", "e"] {
            assert!(limiter.admit(client).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 3);
        assert_eq!(limiter.evicted_clients(), 2);
        // "a" was evicted and starts over with a full bucket
        assert_eq!(limiter.available_tokens("a"), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_refilled_bucket() {
        let mut cfg = config(1000.0, 2.0);
        cfg.max_tracked_clients = 2;
        let limiter = RateLimiter::new(cfg);

        // "idle" is least recently seen but refills; "busy" stays depleted
        assert!(limiter.admit("idle").is_ok());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.admit("busy").is_ok());
        assert!(limiter.admit("busy").is_ok());
        assert_eq!(limiter.admit("busy"), Err(RateLimited::Client));

        // Exactly one token regained, not a full bucket
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.admit("new").is_ok());
        assert_eq!(limiter.evicted_clients(), 1);

        // "busy" kept its depleted bucket instead of a fresh burst
        assert!(limiter.admit("busy").is_ok());
        assert_eq!(limiter.admit("busy"), Err(RateLimited::Client));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_falls_back_to_lru_when_all_depleted() {
        let mut cfg = config(1000.0, 1.0);
        cfg.max_tracked_clients = 2;
        let limiter = RateLimiter::new(cfg);

        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("b").is_ok());
        assert!(limiter.admit("c").is_ok());

        assert_eq!(limiter.tracked_clients(), 2);
        assert_eq!(limiter.evicted_clients(), 1);
        assert_eq!(limiter.available_tokens("a"), 1.0);
        assert_eq!(limiter.available_tokens("b"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_removes_refilled_buckets() {
        let limiter = RateLimiter::new(config(1000.0, 10.0));
        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("b").is_ok());
        assert_eq!(limiter.tracked_clients(), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.prune_idle(), 2);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Global and per-client admissions each stay within burst + rate * elapsed
        #[test]
        fn prop_admit_respects_both_scopes(
            global_rps in 1u32..100,
            client_rps in 1u32..50,
            calls in proptest::collection::vec((0usize..8, 0u64..40), 1..400),
        ) {
            let cfg = RateLimiterConfig {
                global_rps: global_rps as f64,
                global_burst: global_rps as f64,
                client_rps: client_rps as f64,
                client_burst: client_rps as f64,
                max_tracked_clients: 16,
            };
            let limiter = RateLimiter::new(cfg.clone());
            let start = Instant::now();
            let mut now = start;
            let mut global = 0u64;
            let mut per_client = [0u64; 8];

            for (client, step_ms) in calls {
                now += Duration::from_millis(step_ms);
                if limiter.admit_at(&format!("client-{client}"), now).is_ok() {
                    global += 1;
                    per_client[client] += 1;
                }

                let elapsed = (now - start).as_secs_f64();
                let global_bound = cfg.global_burst + cfg.global_rps * elapsed;
                let client_bound = cfg.client_burst + cfg.client_rps * elapsed;
                prop_assert!(global as f64 <= global_bound + 1e-6,
                    "global admitted {} exceeds bound {}", global, global_bound);
                for (i, count) in per_client.iter().enumerate() {
                    prop_assert!(*count as f64 <= client_bound + 1e-6,
                        "client-{} admitted {} exceeds bound {}", i, count, client_bound);
                }
            }
        }
    }
}
