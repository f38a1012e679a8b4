//! Ingress entry point tying the admission components together.
//!
//! ```text
//!   submit(payload, client, priority)
//!        │
//!   ┌────▼────────┐  RateLimited
//!   │ RateLimiter ├──────────────► caller
//!   └────┬────────┘
//!   ┌────▼────────────────┐  Shed / QueueFull / EnqueueTimeout
//!   │ BackpressureQueue   ├──────────────► caller
//!   └────┬────────────────┘
//!   ┌────▼────────┐   ┌────────────────┐   ┌──────────────────┐
//!   │ Scheduler   ├──►│ CircuitBreaker ├──►│ InferenceBackend │
//!   └────┬────────┘   └────────────────┘   └──────────────────┘
//!        │ fan-out (one result per request, or ResultTimeout)
//!        ▼
//!      caller
//! ```
//!
//! All shared state is owned by the [`Gate`] and handed to components
//! explicitly; there are no process-wide singletons besides the Prometheus
//! registry.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::InferenceBackend;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::GateConfig;
use crate::error::{ConfigError, CoreError};
use crate::events::{EventSink, FanoutSink, GateEvent, TracingSink};
use crate::metrics::{GateMetrics, MetricsSnapshot};
use crate::queue::BackpressureQueue;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Scheduler;
use crate::types::{InferenceOutput, Payload, Priority};

/// Health summary of a gate and its backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateHealth {
    pub backend: String,
    pub backend_healthy: bool,
    pub breaker: CircuitState,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub accepting: bool,
}

/// Builder for [`Gate`]
pub struct GateBuilder {
    config: GateConfig,
    backend: Arc<dyn InferenceBackend>,
    sinks: FanoutSink,
    tracing: bool,
    spawn_workers: bool,
}

impl GateBuilder {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            config: GateConfig::default(),
            backend,
            sinks: FanoutSink::new(),
            tracing: true,
            spawn_workers: true,
        }
    }

    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an observer for gate events (may be called repeatedly)
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Log every event through `tracing` (default: on)
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    /// Start scheduler workers on build (default: on). When off, batches
    /// are only dispatched through [`Gate::scheduler`].
    pub fn spawn_workers(mut self, spawn: bool) -> Self {
        self.spawn_workers = spawn;
        self
    }

    /// Validate the configuration and assemble the gate. Spawning workers
    /// requires a Tokio runtime.
    pub fn build(self) -> Result<Gate, ConfigError> {
        self.config.validate()?;

        let metrics = Arc::new(GateMetrics::new());
        let mut sinks = self.sinks.with(metrics.clone());
        if self.tracing {
            sinks.push(Arc::new(TracingSink));
        }
        let events: Arc<dyn EventSink> = Arc::new(sinks);

        let limiter = Arc::new(RateLimiter::new(self.config.rate_limiter.clone()));
        let breaker = Arc::new(CircuitBreaker::with_events(
            self.config.circuit_breaker.clone(),
            events.clone(),
        ));
        let queue =
            Arc::new(BackpressureQueue::with_events(self.config.queue.clone(), events.clone()));
        let scheduler = Arc::new(Scheduler::new(
            self.config.scheduler.clone(),
            queue.clone(),
            breaker.clone(),
            self.backend.clone(),
            events.clone(),
        ));

        let workers = if self.spawn_workers { scheduler.spawn() } else { Vec::new() };
        tracing::info!(
            backend = self.backend.name(),
            workers = workers.len(),
            max_batch_size = self.config.scheduler.max_batch_size,
            queue_capacity = self.config.queue.capacity,
            "Gate started"
        );

        Ok(Gate {
            config: self.config,
            limiter,
            breaker,
            queue,
            scheduler,
            backend: self.backend,
            metrics,
            events,
            workers: Mutex::new(workers),
        })
    }
}

/// Admission control and batching in front of an inference backend
pub struct Gate {
    config: GateConfig,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<BackpressureQueue>,
    scheduler: Arc<Scheduler>,
    backend: Arc<dyn InferenceBackend>,
    metrics: Arc<GateMetrics>,
    events: Arc<dyn EventSink>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Gate {
    /// Build a gate with default observers. Must be called inside a Tokio
    /// runtime.
    pub fn new(config: GateConfig, backend: Arc<dyn InferenceBackend>) -> Result<Self, ConfigError> {
        Self::builder(backend).config(config).build()
    }

    pub fn builder(backend: Arc<dyn InferenceBackend>) -> GateBuilder {
        GateBuilder::new(backend)
    }

    /// Submit one request and wait for its embeddings.
    ///
    /// Rejections (`RateLimited`, `Shed`, `QueueFull`, `EnqueueTimeout`,
    /// `InvalidInput`, `ShuttingDown`) are returned without touching the
    /// backend. `ResultTimeout` means the request may still execute.
    pub async fn submit(
        &self,
        payload: Payload,
        client_id: &str,
        priority: Priority,
    ) -> Result<InferenceOutput, CoreError> {
        let started = Instant::now();
        self.check_payload(&payload)?;
        if self.queue.is_closed() {
            return Err(CoreError::ShuttingDown);
        }

        if let Err(scope) = self.limiter.admit(client_id) {
            self.events.emit(&GateEvent::RateLimited { scope });
            return Err(scope.into());
        }

        let receiver = self.queue.enqueue(payload, client_id, priority).await?;

        let budget = self.config.scheduler.end_to_end_timeout;
        match tokio::time::timeout_at(started + budget, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::Cancelled),
            Err(_) => {
                self.events.emit(&GateEvent::ResultTimeout { waited: started.elapsed() });
                Err(CoreError::ResultTimeout(budget))
            }
        }
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), CoreError> {
        if payload.is_empty() {
            return Err(CoreError::invalid_input("payload has no items"));
        }
        let limit = self.config.scheduler.max_items_per_request;
        if payload.len() > limit {
            return Err(CoreError::invalid_input(format!(
                "{} items exceeds the per-request limit of {}",
                payload.len(),
                limit
            )));
        }
        Ok(())
    }

    /// Current health, including a backend health check
    pub async fn health(&self) -> GateHealth {
        let backend_healthy = match self.backend.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e, "Backend health check failed");
                false
            }
        };
        GateHealth {
            backend: self.backend.name().to_string(),
            backend_healthy,
            breaker: self.breaker.state(),
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            accepting: !self.queue.is_closed(),
        }
    }

    /// Stop admitting, let workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Scheduler worker ended abnormally");
            }
        }
        tracing::info!("Gate shut down");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> &Arc<GateMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> &BackpressureQueue {
        &self.queue
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        // Lets detached workers finish draining and exit
        self.queue.close();
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("backend", &self.backend.name())
            .field("breaker", &self.breaker.state())
            .field("queue_len", &self.queue.len())
            .finish()
    }
}
