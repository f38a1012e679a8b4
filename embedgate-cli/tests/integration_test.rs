//! End-to-end integration tests for the embedgate CLI
//!
//! These tests drive the binary through `cargo run`:
//! - Configuration resolution
//! - Load simulation against the mock backend
//! - Overload and recovery scenarios

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn embedgate(args: &[&str]) -> Output {
    let mut full = vec!["run", "--bin", "embedgate", "--"];
    full.extend_from_slice(args);

    Command::new("cargo")
        .args(&full)
        .current_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).parent().unwrap())
        .output()
        .expect("Failed to run embedgate")
}

/// Test the `embedgate config` command
#[test]
fn test_config_command() {
    let output = embedgate(&["config"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    println!("stdout: {}", stdout);
    println!("stderr: {}", stderr);

    assert!(output.status.success(), "Command failed: {}", stderr);
    assert!(stdout.contains("Configuration valid"), "Missing validation result");
    assert!(stdout.contains("JSON Output"), "Missing JSON output");

    let json_start = stdout.find('{').expect("No JSON found");
    let json: serde_json::Value =
        serde_json::from_str(stdout[json_start..].trim()).expect("Invalid JSON in config output");

    assert!(json.get("rate_limiter").is_some(), "Missing rate_limiter");
    assert!(json.get("circuit_breaker").is_some(), "Missing circuit_breaker");
    assert_eq!(json["queue"]["capacity"], 1000);
    assert_eq!(json["scheduler"]["max_batch_size"], 32);
}

/// Test that presets change the resolved configuration
#[test]
fn test_config_preset() {
    let output = embedgate(&["config", "--preset", "high-throughput"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('{').expect("No JSON found");
    let json: serde_json::Value =
        serde_json::from_str(stdout[json_start..].trim()).expect("Invalid JSON structure");

    assert_eq!(json["scheduler"]["max_batch_size"], 128);
}

/// Test that an unknown preset is rejected
#[test]
fn test_config_unknown_preset() {
    let output = embedgate(&["config", "--preset", "turbo"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown preset"), "Missing error message: {}", stderr);
}

/// Test `embedgate simulate` against the mock backend with JSON output
#[test]
fn test_simulate_mock_output_file() {
    let output_path = std::env::temp_dir().join("embedgate_test_report.json");
    let _ = fs::remove_file(&output_path);

    let output = embedgate(&[
        "simulate",
        "--profile",
        "steady",
        "--requests",
        "50",
        "--mock-latency-ms",
        "1",
        "-o",
        output_path.to_str().unwrap(),
    ]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    println!("stdout: {}", stdout);
    println!("stderr: {}", stderr);

    assert!(output.status.success(), "Command failed: {}", stderr);
    assert!(stdout.contains("Simulation Summary"), "Missing summary");
    assert!(stdout.contains("Latency"), "Missing latency line");
    assert!(output_path.exists(), "Report file was not created");

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output_path).expect("Failed to read report"))
            .expect("Invalid JSON report");

    assert_eq!(report["total"], 50);
    assert_eq!(report["backend"], "mock");
    assert!(report.get("latency").is_some(), "Missing latency");
    assert!(report.get("metrics").is_some(), "Missing metrics");
    assert!(report.get("timestamp").is_some(), "Missing timestamp");

    let _ = fs::remove_file(&output_path);
}

/// Test the Prometheus dump after a simulation
#[test]
fn test_simulate_prometheus() {
    let output = embedgate(&["simulate", "--requests", "10", "--prometheus"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("embedgate_admitted_total"), "Missing admitted counter");
    assert!(stdout.contains("embedgate_batches_total"), "Missing batch counter");
}

/// Test the overload scenario
#[test]
fn test_overload_scenario() {
    let output = embedgate(&["scenario", "overload"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "Scenario failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("all_shed"), "Missing shed check");
    assert!(stdout.contains("passed"), "Missing pass notice");
}

/// Test the recovery scenario with a short open timeout
#[test]
fn test_recovery_scenario() {
    let output = embedgate(&["scenario", "recovery", "--open-timeout-ms", "200"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "Scenario failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("transition_sequence"), "Missing transition check");
}

/// Test CLI help output
#[test]
fn test_cli_help() {
    let output = embedgate(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("config"), "Missing config command");
    assert!(stdout.contains("simulate"), "Missing simulate command");
    assert!(stdout.contains("scenario"), "Missing scenario command");
}
