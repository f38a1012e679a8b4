//! Bounded, priority-ordered backpressure queue.
//!
//! Admitted requests wait here until a scheduler worker drains them into a
//! batch. Near capacity the queue sheds traffic below `High` priority so that
//! headroom stays available for high-priority and administrative requests.
//!
//! ```text
//!   enqueue(payload, client, priority)
//!        │
//!        ├── closed?                          → QueueError::Closed
//!        ├── lock not acquired in time?       → QueueError::Timeout
//!        ├── occupancy ≥ shed_threshold
//!        │   and priority < High?             → QueueError::Shed
//!        ├── len == capacity?                 → QueueError::Full
//!        ▼
//!   ┌─────────────────────────────────────┐
//!   │ Admin  │ ▢ ▢                        │  ← drained first
//!   │ High   │ ▢                          │
//!   │ Normal │ ▢ ▢ ▢ ▢                    │  FIFO within a tier
//!   │ Low    │ ▢ ▢                        │  ← drained last
//!   └─────────────────────────────────────┘
//!        │
//!   dequeue_batch(max_items, wait)  (waits on Notify, never polls)
//! ```

mod config;

pub use config::QueueConfig;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Instant;

use crate::error::{CoreError, QueueError};
use crate::events::{EventSink, GateEvent, NoopSink};
use crate::types::{ClientId, InferenceOutput, Payload, Priority};

/// Result delivered through a request's one-shot channel
pub type RequestResult = Result<InferenceOutput, CoreError>;

/// Caller side of a request's result channel
pub type ResultReceiver = oneshot::Receiver<RequestResult>;

/// A request waiting in, or drained from, the queue
#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub payload: Payload,
    pub priority: Priority,
    pub client_id: ClientId,
    pub enqueued_at: Instant,
    responder: oneshot::Sender<RequestResult>,
}

impl Request {
    /// Resolve the caller's channel. Consumes the request, so a result can
    /// only ever be delivered once. Returns false if the caller stopped
    /// waiting.
    pub fn respond(self, result: RequestResult) -> bool {
        self.responder.send(result).is_ok()
    }

    /// Number of text items in the payload
    pub fn item_count(&self) -> usize {
        self.payload.len()
    }

    /// Whether the caller has already dropped its receiver
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }
}

/// Queued request counts per priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityDepths {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub admin: usize,
}

impl PriorityDepths {
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
            Priority::Admin => self.admin,
        }
    }
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub len: usize,
    pub capacity: usize,
    /// `len / capacity`, the value compared against the shed threshold
    pub occupancy: f64,
    pub depths: PriorityDepths,
    /// Age of the oldest queued request
    pub oldest_wait: Option<Duration>,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Indexed by [`Priority::tier`]
    tiers: [VecDeque<Request>; 4],
    len: usize,
}

impl QueueState {
    fn pop_highest(&mut self) -> Option<Request> {
        for priority in Priority::DESCENDING {
            if let Some(request) = self.tiers[priority.tier()].pop_front() {
                self.len -= 1;
                return Some(request);
            }
        }
        None
    }
}

/// Bounded multi-producer queue drained in batches by the scheduler
pub struct BackpressureQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    /// Mirror of `state.len` for lock-free reads
    len: AtomicUsize,
    closed: AtomicBool,
    next_id: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl BackpressureQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_events(config, Arc::new(NoopSink))
    }

    pub fn with_events(config: QueueConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            len: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Enqueue a request and return the receiver its result will arrive on.
    pub async fn enqueue(
        &self,
        payload: Payload,
        client_id: impl Into<ClientId>,
        priority: Priority,
    ) -> Result<ResultReceiver, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let started = Instant::now();
        let mut state =
            match tokio::time::timeout(self.config.enqueue_timeout, self.state.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    let waited = started.elapsed();
                    self.events.emit(&GateEvent::EnqueueTimeout { waited });
                    return Err(QueueError::Timeout { waited });
                }
            };

        // Checked again under the lock so no request lands after a worker
        // has observed closed + empty
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let occupancy = state.len as f64 / self.config.capacity as f64;
        if occupancy >= self.config.shed_threshold && !priority.bypasses_shedding() {
            drop(state);
            self.events.emit(&GateEvent::Shed { priority, occupancy });
            return Err(QueueError::Shed { priority, occupancy });
        }

        if state.len >= self.config.capacity {
            drop(state);
            let capacity = self.config.capacity;
            self.events.emit(&GateEvent::QueueFull { capacity });
            return Err(QueueError::Full { capacity });
        }

        let (responder, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.tiers[priority.tier()].push_back(Request {
            id,
            payload,
            priority,
            client_id: client_id.into(),
            enqueued_at: Instant::now(),
            responder,
        });
        state.len += 1;
        let queue_len = state.len;
        self.len.store(queue_len, Ordering::Release);
        drop(state);

        self.notify.notify_one();
        tracing::trace!(request_id = id, %priority, queue_len, "Request enqueued");
        self.events.emit(&GateEvent::Admitted { priority, queue_len });
        Ok(receiver)
    }

    /// Remove up to `max_items` requests, highest priority first.
    ///
    /// Waits up to `wait` for the first request to arrive. Returns an empty
    /// vector when the budget elapses, or immediately when the queue is
    /// closed and empty.
    pub async fn dequeue_batch(&self, max_items: usize, wait: Duration) -> Vec<Request> {
        if max_items == 0 {
            return Vec::new();
        }
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a close() between the check and
            // the await is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.len > 0 {
                    let mut batch = Vec::with_capacity(max_items.min(state.len));
                    while batch.len() < max_items {
                        match state.pop_highest() {
                            Some(request) => batch.push(request),
                            None => break,
                        }
                    }
                    let remaining = state.len;
                    self.len.store(remaining, Ordering::Release);
                    drop(state);

                    if remaining > 0 {
                        // Hand the leftovers to another waiting worker
                        self.notify.notify_one();
                    }
                    return batch;
                }
                if self.is_closed() {
                    return Vec::new();
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    /// Stop accepting requests. Queued requests stay available to
    /// [`dequeue_batch`](Self::dequeue_batch) until drained.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(remaining = self.len(), "Queue closed");
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current number of queued requests
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Current occupancy as a fraction of capacity
    pub fn occupancy(&self) -> f64 {
        self.len() as f64 / self.config.capacity as f64
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let now = Instant::now();
        let depth = |p: Priority| state.tiers[p.tier()].len();
        let oldest = state
            .tiers
            .iter()
            .filter_map(|tier| tier.front().map(|r| r.enqueued_at))
            .min();

        QueueSnapshot {
            len: state.len,
            capacity: self.config.capacity,
            occupancy: state.len as f64 / self.config.capacity as f64,
            depths: PriorityDepths {
                low: depth(Priority::Low),
                normal: depth(Priority::Normal),
                high: depth(Priority::High),
                admin: depth(Priority::Admin),
            },
            oldest_wait: oldest.map(|at| now.saturating_duration_since(at)),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for BackpressureQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureQueue")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
