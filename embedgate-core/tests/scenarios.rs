//! End-to-end scenarios against a gate backed by the mock engine.

use std::sync::Arc;
use std::time::Duration;

use embedgate_core::circuit_breaker::CircuitState;
use embedgate_core::events::{BatchOutcome, FlushReason, RecordingSink};
use embedgate_core::{
    CoreError, Gate, GateConfig, MockBackend, Payload, Priority, RateLimiterConfig,
};
use futures::future::join_all;

fn text(s: &str) -> Payload {
    vec![s.to_string()]
}

fn unlimited() -> GateConfig {
    GateConfig { rate_limiter: RateLimiterConfig::unlimited(), ..Default::default() }
}

struct TestGate {
    gate: Arc<Gate>,
    backend: Arc<MockBackend>,
    sink: Arc<RecordingSink>,
}

fn build(config: GateConfig, spawn_workers: bool) -> TestGate {
    let backend = Arc::new(MockBackend::new(8));
    let sink = Arc::new(RecordingSink::new());
    let gate = Gate::builder(backend.clone())
        .config(config)
        .event_sink(sink.clone())
        .tracing(false)
        .spawn_workers(spawn_workers)
        .build()
        .expect("valid config");
    TestGate { gate: Arc::new(gate), backend, sink }
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_inside_window_flushes_once() {
    let t = build(unlimited(), true);

    let submits = (0..32).map(|i| {
        let gate = t.gate.clone();
        tokio::spawn(async move { gate.submit(text(&format!("req {i}")), "c", Priority::Normal).await })
    });
    let results = join_all(submits).await;

    for result in results {
        let output = result.unwrap().unwrap();
        assert_eq!(output.batch_size, 32);
    }

    let batches = t.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].requests, 32);
    assert_eq!(batches[0].reason, FlushReason::Size);
    assert_eq!(t.backend.batch_sizes(), vec![32]);
}

#[tokio::test(start_paused = true)]
async fn test_single_request_flushes_within_max_wait() {
    let t = build(unlimited(), true);

    let output = t.gate.submit(text("alone"), "c", Priority::Normal).await.unwrap();
    assert_eq!(output.batch_size, 1);

    let batches = t.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].reason, FlushReason::Timer);
    assert!(batches[0].oldest_wait <= Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_every_request_resolved_once_when_batch_fails() {
    let t = build(unlimited(), true);
    t.backend.set_failing(true);

    let submits = (0..5).map(|i| {
        let gate = t.gate.clone();
        tokio::spawn(async move { gate.submit(text(&format!("req {i}")), "c", Priority::Normal).await })
    });
    let results = join_all(submits).await;

    for result in results {
        assert!(matches!(result.unwrap(), Err(CoreError::Backend(_))));
    }
    let batches = t.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].outcome, BatchOutcome::BackendError);
    assert_eq!(batches[0].abandoned, 0);
    assert_eq!(t.gate.breaker().snapshot().window_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_overload_sheds_without_touching_queue_or_breaker() {
    let t = build(unlimited(), false);

    // 96% occupancy, nothing draining. Normal is shed from 950 on, so High
    // tops up the last slots.
    let mut parked = Vec::new();
    for i in 0..960 {
        let priority = if i < 950 { Priority::Normal } else { Priority::High };
        parked.push(
            t.gate
                .queue()
                .enqueue(text(&format!("parked {i}")), "filler", priority)
                .await
                .unwrap(),
        );
    }
    assert!(t.gate.queue().occupancy() >= 0.96);
    t.sink.clear();

    let mut shed = 0;
    for i in 0..2000 {
        match t.gate.submit(text(&format!("burst {i}")), "burst", Priority::Normal).await {
            Err(CoreError::Shed { priority: Priority::Normal }) => shed += 1,
            other => panic!("expected Shed, got {:?}", other),
        }
    }

    assert_eq!(shed, 2000);
    assert_eq!(t.gate.queue().len(), 960);
    assert_eq!(t.gate.breaker().state(), CircuitState::Closed);
    assert!(t.sink.transitions().is_empty());
    assert_eq!(t.backend.calls(), 0);
    assert_eq!(t.gate.metrics().shed, 2000);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_backend_failures() {
    let mut config = unlimited();
    config.scheduler.end_to_end_timeout = Duration::from_secs(1);
    let t = build(config, true);

    // Warm-up so the 10-outcome window fills on the failures
    for i in 0..4 {
        assert!(t.gate.submit(text(&format!("warm {i}")), "c", Priority::Normal).await.is_ok());
    }

    t.backend.fail_next(6);
    for i in 0..6 {
        let err = t.gate.submit(text(&format!("fail {i}")), "c", Priority::Normal).await;
        assert!(matches!(err, Err(CoreError::Backend(_))));
    }
    assert_eq!(t.gate.breaker().state(), CircuitState::Open);

    // Fails fast while open
    let calls_before = t.backend.calls();
    assert_eq!(
        t.gate.submit(text("while open"), "c", Priority::Normal).await,
        Err(CoreError::BreakerOpen)
    );
    assert_eq!(t.backend.calls(), calls_before);

    tokio::time::sleep(Duration::from_secs(31)).await;

    for i in 0..3 {
        assert!(t.gate.submit(text(&format!("probe {i}")), "c", Priority::Normal).await.is_ok());
    }
    assert_eq!(t.gate.breaker().state(), CircuitState::Closed);

    // Dispatched normally, not probed again
    assert!(t.gate.submit(text("after"), "c", Priority::Normal).await.is_ok());
    assert_eq!(t.gate.breaker().state(), CircuitState::Closed);
    assert_eq!(
        t.sink.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_admitted_under_overload() {
    let t = build(unlimited(), false);
    for i in 0..950 {
        let _ = t.gate.queue().enqueue(text(&format!("{i}")), "filler", Priority::Low).await.unwrap();
    }

    let receiver = t.gate.queue().enqueue(text("vip"), "admin", Priority::High).await;
    assert!(receiver.is_ok());

    let batch = t.gate.scheduler().next_batch().await.unwrap();
    assert_eq!(batch.requests()[0].priority, Priority::High);
}
