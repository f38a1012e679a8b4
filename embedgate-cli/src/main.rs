use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use embedgate_adapters_ollama::{OllamaConfig, OllamaEmbedBackend};
use embedgate_benchmarks::{
    find_profile, get_standard_profiles, run_overload_scenario, run_recovery_scenario,
    ScenarioOutcome, ScenarioRunner,
};
use embedgate_core::metrics::{encode_metrics, observe_queue, PrometheusSink};
use embedgate_core::{Gate, GateConfig, InferenceBackend, MockBackend};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "embedgate")]
#[command(version = "0.1.0")]
#[command(about = "embedgate - Admission control and batching for embedding inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved gate configuration
    Config {
        /// Preset to start from (default, low-latency, high-throughput)
        #[arg(short, long, default_value = "default")]
        preset: String,

        /// Read EMBEDGATE_* environment overrides instead of a preset
        #[arg(long)]
        from_env: bool,
    },

    /// Run a load profile against a backend
    Simulate {
        /// Load profile (steady, bursty, mixed_priority)
        #[arg(long, default_value = "steady")]
        profile: String,

        /// Preset to configure the gate with
        #[arg(long, default_value = "default")]
        preset: String,

        /// Backend to run against
        #[arg(short, long, value_enum, default_value_t = BackendKind::Mock)]
        backend: BackendKind,

        /// Ollama base URL (defaults to OLLAMA_HOST)
        #[arg(long)]
        ollama_url: Option<String>,

        /// Ollama embedding model
        #[arg(short, long)]
        model: Option<String>,

        /// Simulated inference latency of the mock backend in milliseconds
        #[arg(long, default_value_t = 2)]
        mock_latency_ms: u64,

        /// Override the profile's request count
        #[arg(long)]
        requests: Option<usize>,

        /// Override the profile's concurrency
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output file for the report (JSON)
        #[arg(short, long)]
        output: Option<String>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        prometheus: bool,
    },

    /// Run a built-in acceptance scenario against the mock backend
    Scenario {
        #[arg(value_enum)]
        name: ScenarioName,

        /// Breaker open timeout for the recovery scenario in milliseconds
        #[arg(long, default_value_t = 30_000)]
        open_timeout_ms: u64,

        /// Output file for the outcome (JSON)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List the standard load profiles
    Profiles,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    Mock,
    Ollama,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioName {
    Overload,
    Recovery,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(
            "embedgate=info,embedgate_core=info,embedgate_benchmarks=info,embedgate_adapters_ollama=info",
        ));

    // stdout carries reports and JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { preset, from_env } => {
            let config = if from_env { GateConfig::from_env() } else { resolve_preset(&preset)? };
            debug!(?config, "Resolved configuration");

            println!("⚙️  embedgate configuration ({})\n", if from_env { "environment" } else { preset.as_str() });
            match config.validate() {
                Ok(()) => println!("✓ Configuration valid\n"),
                Err(e) => println!("❌ Configuration invalid: {}\n", e),
            }

            println!("=== JSON Output ===");
            println!("{}", serde_json::to_string_pretty(&config.summary())?);
        }

        Commands::Simulate {
            profile,
            preset,
            backend,
            ollama_url,
            model,
            mock_latency_ms,
            requests,
            concurrency,
            output,
            prometheus,
        } => {
            let mut load = find_profile(&profile).with_context(|| {
                format!("Unknown profile '{}'. Use `embedgate profiles` to list them", profile)
            })?;
            if let Some(requests) = requests {
                load.requests = requests;
            }
            if let Some(concurrency) = concurrency {
                load.concurrency = concurrency;
            }

            let config = resolve_preset(&preset)?;
            debug!(?config, "Resolved configuration");
            let backend: Arc<dyn InferenceBackend> = match backend {
                BackendKind::Mock => Arc::new(
                    MockBackend::new(384).with_latency(Duration::from_millis(mock_latency_ms)),
                ),
                BackendKind::Ollama => {
                    let mut ollama = OllamaConfig::from_env();
                    ollama.merge(&OllamaConfig {
                        ollama_host: ollama_url,
                        embed_model: model,
                        ..Default::default()
                    });
                    Arc::new(OllamaEmbedBackend::from_config(&ollama))
                }
            };

            println!("🚀 embedgate Load Simulation\n");
            println!("Profile: {}", load.name);
            println!("Backend: {}", backend.name());
            println!("Preset: {}\n", preset);

            print!("Checking backend availability... ");
            if let Err(e) = backend.health_check().await {
                println!("❌");
                warn!(backend = backend.name(), error = %e, "Backend health check failed");
                anyhow::bail!("Backend '{}' is not available: {}", backend.name(), e);
            }
            println!("✓\n");

            let mut builder = Gate::builder(backend).config(config);
            if prometheus {
                embedgate_core::init_metrics();
                builder = builder.event_sink(Arc::new(PrometheusSink));
            }
            let gate = Arc::new(builder.build().context("Invalid gate configuration")?);

            let runner = ScenarioRunner::new(gate.clone());
            let report = runner.run(&load).await?;
            if prometheus {
                observe_queue(&gate.queue().snapshot().await);
            }
            gate.shutdown().await;

            println!("═══════════════════════════════════════════════════════");
            println!("\n📊 Simulation Summary\n");
            println!("Requests: {} ({} ok, {} failed)", report.total, report.succeeded, report.failed);
            println!("Success rate: {:.1}%", report.success_rate() * 100.0);
            for (kind, count) in &report.failures {
                println!("  {}: {}", kind, count);
            }
            println!(
                "Latency: p50 {:.1}ms, p95 {:.1}ms, p99 {:.1}ms, max {:.1}ms",
                report.latency.p50_ms, report.latency.p95_ms, report.latency.p99_ms, report.latency.max_ms
            );
            println!("Throughput: {:.1} req/s", report.throughput_rps);
            println!(
                "Batches: {} (avg {:.1} requests, max {})",
                report.metrics.batches, report.metrics.avg_batch_size, report.metrics.max_batch_requests
            );
            println!("Breaker: {}", report.breaker);
            println!();

            if prometheus {
                println!("=== Prometheus Metrics ===");
                println!("{}", encode_metrics());
            }

            if let Some(path) = output {
                report.save(&path)?;
                println!("✅ Report saved to: {}", path);
            } else {
                println!("💡 Tip: Use -o <file> to save the report to JSON");
            }
        }

        Commands::Scenario { name, open_timeout_ms, output } => {
            let outcome = match name {
                ScenarioName::Overload => {
                    println!("🌊 Overload scenario\n");
                    run_overload_scenario().await?
                }
                ScenarioName::Recovery => {
                    println!("🔁 Recovery scenario (open timeout {}ms)\n", open_timeout_ms);
                    run_recovery_scenario(Duration::from_millis(open_timeout_ms)).await?
                }
            };

            info!(scenario = %outcome.scenario, passed = outcome.passed(), "Scenario finished");
            print_outcome(&outcome);

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&outcome)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write outcome to {}", path))?;
                println!("✅ Outcome saved to: {}", path);
            }

            if !outcome.passed() {
                anyhow::bail!("Scenario '{}' failed", outcome.scenario);
            }
        }

        Commands::Profiles => {
            println!("📋 Standard load profiles\n");
            for profile in get_standard_profiles() {
                let mix = profile.priority_mix;
                println!("{}:", profile.name);
                println!("  Requests: {}", profile.requests);
                println!("  Concurrency: {}", profile.concurrency);
                println!("  Clients: {}", profile.clients);
                println!("  Items per request: {}", profile.items_per_request);
                println!(
                    "  Priority mix (low/normal/high/admin): {}/{}/{}/{}",
                    mix.low, mix.normal, mix.high, mix.admin
                );
                println!();
            }
        }
    }

    Ok(())
}

fn resolve_preset(name: &str) -> anyhow::Result<GateConfig> {
    GateConfig::preset(name).with_context(|| {
        format!("Unknown preset '{}' (expected default, low-latency or high-throughput)", name)
    })
}

fn print_outcome(outcome: &ScenarioOutcome) {
    for check in &outcome.checks {
        let mark = if check.passed { "✓" } else { "❌" };
        println!("  {} {}: {}", mark, check.name, check.detail);
    }
    println!();
    if outcome.passed() {
        println!("✅ Scenario '{}' passed", outcome.scenario);
    } else {
        println!("❌ Scenario '{}' failed", outcome.scenario);
    }
}
