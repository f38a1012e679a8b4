//! Fixed-size ring buffer of call outcomes.

use std::collections::VecDeque;

/// Outcome of one call through the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Sliding window over the most recent `size` outcomes. The oldest outcome is
/// evicted when a new one arrives at capacity.
#[derive(Debug, Clone)]
pub(crate) struct OutcomeWindow {
    outcomes: VecDeque<Outcome>,
    size: usize,
    failures: usize,
}

impl OutcomeWindow {
    pub(crate) fn new(size: usize) -> Self {
        Self { outcomes: VecDeque::with_capacity(size), size, failures: 0 }
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.size {
            if let Some(Outcome::Failure) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        if outcome == Outcome::Failure {
            self.failures += 1;
        }
        self.outcomes.push_back(outcome);
    }

    /// Whether the window holds `size` outcomes since the last reset
    pub(crate) fn is_full(&self) -> bool {
        self.outcomes.len() == self.size
    }

    pub(crate) fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.failures as f64 / self.outcomes.len() as f64
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures
    }

    pub(crate) fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}
