//! Inference backend contract.
//!
//! The admission core only needs a single fallible batched call. How the
//! engine runs (local GPU, remote HTTP service, CPU) is up to the
//! implementation.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::BackendError;
use crate::types::Embedding;

/// A batched embedding engine.
///
/// `infer` receives the concatenated items of every request in a batch and
/// must return exactly one embedding per item, in the same order.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, items: Vec<String>) -> Result<Vec<Embedding>, BackendError>;

    /// Check whether the backend can serve requests
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Short name used in logs and reports
    fn name(&self) -> &str;
}

/// Deterministic in-process backend for tests and load scenarios.
///
/// Embeddings are drawn from an RNG seeded with the xxh3 hash of the input
/// text, so the same text always maps to the same unit vector.
#[derive(Debug)]
pub struct MockBackend {
    dimension: usize,
    latency: Duration,
    failing: AtomicBool,
    fail_next: AtomicU32,
    drop_last_output: AtomicBool,
    calls: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            latency: Duration::ZERO,
            failing: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            drop_last_output: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Simulated time spent per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every call until switched off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, then recover
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Return one embedding fewer than requested
    pub fn set_drop_last_output(&self, drop_last: bool) {
        self.drop_last_output.store(drop_last, Ordering::SeqCst);
    }

    /// Number of `infer` calls received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Item count of every `infer` call, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The embedding this backend produces for `text`
    pub fn embed(&self, text: &str) -> Embedding {
        let mut rng = StdRng::seed_from_u64(xxh3_64(text.as_bytes()));
        let mut vector: Vec<f32> =
            (0..self.dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn infer(&self, items: Vec<String>) -> Result<Vec<Embedding>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(items.len());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail() {
            return Err(BackendError::inference("mock backend failure"));
        }

        let mut embeddings: Vec<Embedding> = items.iter().map(|text| self.embed(text)).collect();
        if self.drop_last_output.load(Ordering::SeqCst) {
            embeddings.pop();
        }
        Ok(embeddings)
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::unavailable("mock backend set to fail"))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
