// embedgate Load Scenarios
//
// Synthetic traffic against a gate: load profiles with an outcome/latency
// report, plus the overload and recovery acceptance runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use embedgate_core::events::RecordingSink;
use embedgate_core::metrics::MetricsSnapshot;
use embedgate_core::{
    CircuitState, CoreError, Gate, GateConfig, MockBackend, Payload, Priority, RateLimiterConfig,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Relative weight of each priority class in a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityMix {
    pub low: u32,
    pub normal: u32,
    pub high: u32,
    pub admin: u32,
}

impl Default for PriorityMix {
    fn default() -> Self {
        Self::normal_only()
    }
}

impl PriorityMix {
    pub fn normal_only() -> Self {
        Self { low: 0, normal: 1, high: 0, admin: 0 }
    }

    fn total(&self) -> u32 {
        self.low + self.normal + self.high + self.admin
    }

    /// Priority of the request at `index`.
    ///
    /// Walks the weights in Low, Normal, High, Admin order, so every run of
    /// `low + normal + high + admin` consecutive requests matches the mix
    /// exactly. An all-zero mix yields `Normal`.
    pub fn pick(&self, index: usize) -> Priority {
        let total = self.total();
        if total == 0 {
            return Priority::Normal;
        }

        let mut slot = (index % total as usize) as u32;
        for (weight, priority) in [
            (self.low, Priority::Low),
            (self.normal, Priority::Normal),
            (self.high, Priority::High),
            (self.admin, Priority::Admin),
        ] {
            if slot < weight {
                return priority;
            }
            slot -= weight;
        }
        Priority::Normal
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoadProfile {
    pub name: String,
    /// Total requests submitted
    pub requests: usize,
    /// Requests in flight at once
    pub concurrency: usize,
    /// Distinct client ids, assigned round-robin
    pub clients: usize,
    pub items_per_request: usize,
    pub priority_mix: PriorityMix,
}

impl LoadProfile {
    fn payload(&self, index: usize) -> Payload {
        (0..self.items_per_request.max(1))
            .map(|item| format!("{} request {} item {}", self.name, index, item))
            .collect()
    }

    fn client(&self, index: usize) -> String {
        format!("client-{}", index % self.clients.max(1))
    }
}

/// Latency distribution of successful requests, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let total: Duration = samples.iter().sum();
        Self {
            count: samples.len(),
            mean_ms: as_ms(total) / samples.len() as f64,
            p50_ms: as_ms(percentile(&samples, 0.50)),
            p95_ms: as_ms(percentile(&samples, 0.95)),
            p99_ms: as_ms(percentile(&samples, 0.99)),
            max_ms: as_ms(samples[samples.len() - 1]),
        }
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Nearest-rank percentile over sorted, non-empty samples
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub profile: LoadProfile,
    pub backend: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failure counts keyed by error kind
    pub failures: BTreeMap<String, usize>,
    pub latency: LatencySummary,
    pub elapsed_ms: f64,
    pub throughput_rps: f64,
    pub metrics: MetricsSnapshot,
    pub breaker: CircuitState,
    pub timestamp: String,
}

impl LoadReport {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}

/// Drives a gate with a [`LoadProfile`]
pub struct ScenarioRunner {
    gate: Arc<Gate>,
}

impl ScenarioRunner {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// Submit every request of the profile and collect the outcomes
    pub async fn run(&self, profile: &LoadProfile) -> anyhow::Result<LoadReport> {
        if profile.requests == 0 {
            anyhow::bail!("Profile '{}' has no requests", profile.name);
        }
        if profile.concurrency == 0 {
            anyhow::bail!("Profile '{}' has zero concurrency", profile.name);
        }

        tracing::info!(
            profile = %profile.name,
            requests = profile.requests,
            concurrency = profile.concurrency,
            clients = profile.clients,
            "Running load profile"
        );

        let started = Instant::now();
        let results: Vec<_> = stream::iter(0..profile.requests)
            .map(|index| {
                let gate = self.gate.clone();
                let payload = profile.payload(index);
                let client = profile.client(index);
                let priority = profile.priority_mix.pick(index);
                async move {
                    let sent = Instant::now();
                    let result = gate.submit(payload, &client, priority).await;
                    (result, sent.elapsed())
                }
            })
            .buffer_unordered(profile.concurrency)
            .collect()
            .await;
        let elapsed = started.elapsed();

        let mut latencies = Vec::with_capacity(results.len());
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        for (result, latency) in results {
            match result {
                Ok(_) => latencies.push(latency),
                Err(e) => *failures.entry(e.kind().to_string()).or_default() += 1,
            }
        }

        let succeeded = latencies.len();
        let throughput_rps = if elapsed.as_secs_f64() > 0.0 {
            succeeded as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        tracing::info!(
            profile = %profile.name,
            succeeded,
            failed = profile.requests - succeeded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Load profile finished"
        );

        Ok(LoadReport {
            profile: profile.clone(),
            backend: self.gate.backend_name().to_string(),
            total: profile.requests,
            succeeded,
            failed: profile.requests - succeeded,
            failures,
            latency: LatencySummary::from_samples(latencies),
            elapsed_ms: as_ms(elapsed),
            throughput_rps,
            metrics: self.gate.metrics(),
            breaker: self.gate.breaker().state(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

/// Get standard load profiles
pub fn get_standard_profiles() -> Vec<LoadProfile> {
    vec![
        LoadProfile {
            name: "steady".to_string(),
            requests: 500,
            concurrency: 32,
            clients: 8,
            items_per_request: 1,
            priority_mix: PriorityMix::normal_only(),
        },
        LoadProfile {
            name: "bursty".to_string(),
            requests: 2000,
            concurrency: 256,
            clients: 4,
            items_per_request: 4,
            priority_mix: PriorityMix { low: 2, normal: 6, high: 1, admin: 1 },
        },
        LoadProfile {
            name: "mixed_priority".to_string(),
            requests: 1000,
            concurrency: 128,
            clients: 16,
            items_per_request: 2,
            priority_mix: PriorityMix { low: 4, normal: 4, high: 1, admin: 1 },
        },
    ]
}

/// Look up a standard profile by name
pub fn find_profile(name: &str) -> Option<LoadProfile> {
    get_standard_profiles().into_iter().find(|p| p.name == name)
}

/// One pass/fail assertion of a scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub checks: Vec<ScenarioCheck>,
    pub metrics: MetricsSnapshot,
    pub timestamp: String,
}

impl ScenarioOutcome {
    fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            checks: Vec::new(),
            metrics: MetricsSnapshot::default(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn check(&mut self, name: &'static str, passed: bool, detail: String) {
        if !passed {
            tracing::warn!(scenario = %self.scenario, check = name, %detail, "Scenario check failed");
        }
        self.checks.push(ScenarioCheck { name, passed, detail });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Requests submitted against the pre-filled queue in the overload run
pub const OVERLOAD_BURST: usize = 2000;

fn text(s: String) -> Payload {
    vec![s]
}

fn unlimited_config() -> GateConfig {
    GateConfig { rate_limiter: RateLimiterConfig::unlimited(), ..Default::default() }
}

/// Fill the queue to 96% with nothing draining, then burst `Normal` traffic.
///
/// Every burst request must be shed without growing the queue, touching the
/// backend or moving the breaker; a `High` request must still be admitted.
pub async fn run_overload_scenario() -> anyhow::Result<ScenarioOutcome> {
    let config = unlimited_config();
    let prefill = config.queue.capacity * 96 / 100;
    let shed_threshold = config.queue.shed_threshold;

    let backend = Arc::new(MockBackend::default());
    let sink = Arc::new(RecordingSink::new());
    let gate = Gate::builder(backend.clone())
        .config(config)
        .event_sink(sink.clone())
        .spawn_workers(false)
        .build()
        .context("Failed to build gate")?;

    // Normal traffic is shed from the threshold on; High tops the queue up past it
    let mut parked = Vec::with_capacity(prefill + 1);
    for i in 0..prefill {
        let priority = if gate.queue().occupancy() < shed_threshold {
            Priority::Normal
        } else {
            Priority::High
        };
        let receiver = gate
            .queue()
            .enqueue(text(format!("parked {i}")), "filler", priority)
            .await
            .context("Failed to pre-fill queue")?;
        parked.push(receiver);
    }

    let mut outcome = ScenarioOutcome::new("overload");
    let occupancy = gate.queue().occupancy();
    outcome.check(
        "occupancy_reached",
        occupancy >= 0.96,
        format!("queue at {:.1}% before the burst", occupancy * 100.0),
    );

    let mut shed = 0usize;
    let mut other: BTreeMap<&'static str, usize> = BTreeMap::new();
    for i in 0..OVERLOAD_BURST {
        match gate.submit(text(format!("burst {i}")), "burst", Priority::Normal).await {
            Err(CoreError::Shed { .. }) => shed += 1,
            Err(e) => *other.entry(e.kind()).or_default() += 1,
            Ok(_) => *other.entry("completed").or_default() += 1,
        }
    }

    outcome.check(
        "all_shed",
        shed == OVERLOAD_BURST,
        format!("{shed}/{OVERLOAD_BURST} shed, other outcomes {other:?}"),
    );
    outcome.check(
        "queue_unchanged",
        gate.queue().len() == prefill,
        format!("queue length {} (pre-filled {prefill})", gate.queue().len()),
    );
    outcome.check(
        "breaker_untouched",
        gate.breaker().state() == CircuitState::Closed && sink.transitions().is_empty(),
        format!("breaker {}, {} transitions", gate.breaker().state(), sink.transitions().len()),
    );
    outcome.check(
        "backend_untouched",
        backend.calls() == 0,
        format!("{} backend calls", backend.calls()),
    );

    match gate.queue().enqueue(text("priority".to_string()), "admin", Priority::High).await {
        Ok(receiver) => {
            parked.push(receiver);
            outcome.check("high_priority_admitted", true, "admitted".to_string());
        }
        Err(e) => outcome.check("high_priority_admitted", false, e.to_string()),
    }

    outcome.metrics = gate.metrics();
    gate.shutdown().await;
    drop(parked);
    Ok(outcome)
}

/// Trip the breaker with injected failures, wait out `open_timeout` and
/// check that probe successes close it again.
pub async fn run_recovery_scenario(open_timeout: Duration) -> anyhow::Result<ScenarioOutcome> {
    let mut config = unlimited_config();
    config.circuit_breaker.open_timeout = open_timeout;
    config.scheduler.end_to_end_timeout = Duration::from_secs(1);

    let breaker = config.circuit_breaker.clone();
    // One past the trip minimum: 6 of 10 at the default 0.5 threshold
    let failures = ((breaker.failure_threshold * breaker.window_size as f64).ceil() as usize + 1)
        .min(breaker.window_size);
    let warm_up = breaker.window_size.saturating_sub(failures);

    let backend = Arc::new(MockBackend::default());
    let sink = Arc::new(RecordingSink::new());
    let gate = Gate::builder(backend.clone())
        .config(config)
        .event_sink(sink.clone())
        .build()
        .context("Failed to build gate")?;

    let mut outcome = ScenarioOutcome::new("recovery");

    for i in 0..warm_up {
        gate.submit(text(format!("warm {i}")), "recovery", Priority::Normal)
            .await
            .context("Warm-up request failed")?;
    }

    backend.fail_next(failures as u32);
    let mut surfaced = 0usize;
    for i in 0..failures {
        if let Err(CoreError::Backend(_)) =
            gate.submit(text(format!("fail {i}")), "recovery", Priority::Normal).await
        {
            surfaced += 1;
        }
    }
    outcome.check(
        "breaker_opened",
        gate.breaker().state() == CircuitState::Open,
        format!("{surfaced}/{failures} injected failures surfaced, breaker {}", gate.breaker().state()),
    );

    let calls_before = backend.calls();
    let while_open = gate.submit(text("while open".to_string()), "recovery", Priority::Normal).await;
    let detail = match &while_open {
        Ok(_) => "dispatched".to_string(),
        Err(e) => e.kind().to_string(),
    };
    outcome.check(
        "fails_fast_while_open",
        matches!(while_open, Err(CoreError::BreakerOpen)) && backend.calls() == calls_before,
        detail,
    );

    tokio::time::sleep(open_timeout + Duration::from_millis(50)).await;

    let probes = breaker.half_open_successes as usize;
    let mut probe_ok = 0usize;
    for i in 0..probes {
        if gate.submit(text(format!("probe {i}")), "recovery", Priority::Normal).await.is_ok() {
            probe_ok += 1;
        }
    }
    outcome.check(
        "closed_after_probes",
        probe_ok == probes && gate.breaker().state() == CircuitState::Closed,
        format!("{probe_ok}/{probes} probes succeeded, breaker {}", gate.breaker().state()),
    );

    let after = gate.submit(text("after".to_string()), "recovery", Priority::Normal).await;
    outcome.check(
        "dispatched_after_recovery",
        after.is_ok() && gate.breaker().state() == CircuitState::Closed,
        format!("breaker {}", gate.breaker().state()),
    );

    let expected = vec![
        (CircuitState::Closed, CircuitState::Open),
        (CircuitState::Open, CircuitState::HalfOpen),
        (CircuitState::HalfOpen, CircuitState::Closed),
    ];
    let transitions = sink.transitions();
    outcome.check("transition_sequence", transitions == expected, format!("{transitions:?}"));

    outcome.metrics = gate.metrics();
    gate.shutdown().await;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_gate(config: GateConfig) -> Arc<Gate> {
        let gate = Gate::builder(Arc::new(MockBackend::default()))
            .config(config)
            .tracing(false)
            .build()
            .unwrap();
        Arc::new(gate)
    }

    #[test]
    fn test_standard_profiles() {
        let profiles = get_standard_profiles();
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[0].name, "steady");
        assert!(find_profile("bursty").is_some());
        assert!(find_profile("missing").is_none());
    }

    #[test]
    fn test_priority_mix_follows_weights() {
        let mix = PriorityMix { low: 1, normal: 2, high: 1, admin: 0 };
        let picked: Vec<_> = (0..5).map(|i| mix.pick(i)).collect();
        assert_eq!(
            picked,
            vec![Priority::Low, Priority::Normal, Priority::Normal, Priority::High, Priority::Low]
        );

        let empty = PriorityMix { low: 0, normal: 0, high: 0, admin: 0 };
        assert_eq!(empty.pick(7), Priority::Normal);
    }

    #[test]
    fn test_latency_percentiles() {
        let samples = (1..=100).map(Duration::from_millis).collect();
        let summary = LatencySummary::from_samples(samples);
        assert_eq!(summary.count, 100);
        assert!((summary.p50_ms - 50.0).abs() < 1e-9);
        assert!((summary.p95_ms - 95.0).abs() < 1e-9);
        assert!((summary.p99_ms - 99.0).abs() < 1e-9);
        assert!((summary.max_ms - 100.0).abs() < 1e-9);
        assert!((summary.mean_ms - 50.5).abs() < 1e-9);

        assert_eq!(LatencySummary::from_samples(Vec::new()), LatencySummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_all_succeed() {
        let gate = mock_gate(unlimited_config());
        let runner = ScenarioRunner::new(gate);
        let profile = LoadProfile {
            name: "unit".to_string(),
            requests: 64,
            concurrency: 64,
            clients: 4,
            items_per_request: 2,
            priority_mix: PriorityMix::normal_only(),
        };

        let report = runner.run(&profile).await.unwrap();
        assert_eq!(report.total, 64);
        assert_eq!(report.succeeded, 64);
        assert!(report.failures.is_empty());
        assert_eq!(report.backend, "mock");
        assert_eq!(report.metrics.admitted, 64);
        assert_eq!(report.breaker, CircuitState::Closed);
        assert!((report.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_counts_failures_by_kind() {
        let config = GateConfig {
            rate_limiter: RateLimiterConfig {
                client_rps: 1.0,
                client_burst: 5.0,
                ..RateLimiterConfig::unlimited()
            },
            ..Default::default()
        };
        let runner = ScenarioRunner::new(mock_gate(config));
        let profile = LoadProfile {
            name: "limited".to_string(),
            requests: 20,
            concurrency: 1,
            clients: 1,
            items_per_request: 1,
            priority_mix: PriorityMix::normal_only(),
        };

        let report = runner.run(&profile).await.unwrap();
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.failures.get("rate_limited_client"), Some(&15));
    }

    #[tokio::test]
    async fn test_runner_rejects_empty_profile() {
        let runner = ScenarioRunner::new(mock_gate(unlimited_config()));
        let profile = LoadProfile { requests: 0, ..get_standard_profiles()[0].clone() };
        assert!(runner.run(&profile).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_scenario_passes() {
        let outcome = run_overload_scenario().await.unwrap();
        assert!(outcome.passed(), "{:?}", outcome.checks);
        assert!(outcome.checks.iter().any(|c| c.name == "occupancy_reached" && c.passed));
        assert_eq!(outcome.metrics.shed, OVERLOAD_BURST as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_scenario_passes() {
        let outcome = run_recovery_scenario(Duration::from_secs(30)).await.unwrap();
        assert!(outcome.passed(), "{:?}", outcome.checks);
        assert_eq!(outcome.metrics.breaker_opens, 1);
        assert_eq!(outcome.metrics.breaker_closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_saved_as_json() {
        let runner = ScenarioRunner::new(mock_gate(unlimited_config()));
        let profile = LoadProfile { requests: 4, concurrency: 2, ..get_standard_profiles()[0].clone() };
        let report = runner.run(&profile).await.unwrap();

        let path = std::env::temp_dir().join(format!("embedgate-report-{}.json", std::process::id()));
        report.save(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["profile"]["name"], "steady");
        assert_eq!(value["succeeded"], 4);
        let _ = std::fs::remove_file(path);
    }
}
