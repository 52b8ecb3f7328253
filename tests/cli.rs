//! Exit codes and output of the `dht11_diag` binary

use std::fs;
use std::process::{Command, Output};

fn dht11_diag(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dht11_diag"))
        .args(args)
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to launch dht11_diag")
}

#[test]
fn test_mock_run_exits_zero() {
    let output = dht11_diag(&["--mock"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("DHT11 SCPI DIAGNOSTIC"));
    assert!(stdout.contains("SUMMARY: 14/14 checks passed"));
    assert!(stdout.contains("All checks passed"));
}

#[test]
fn test_mock_run_writes_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let output = dht11_diag(&["--mock", "--json", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["summary"]["failed"], 0);
    assert_eq!(value["run"]["transport"], "mock");
}

#[test]
fn test_invalid_option_exits_one() {
    let output = dht11_diag(&["--mock", "--speed-iterations", "0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("run.speed_iterations"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("SUMMARY"));
}

#[test]
fn test_missing_config_exits_one() {
    let output = dht11_diag(&["--mock", "--config", "/nonexistent.toml"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Config file not found"));
}

#[test]
fn test_malformed_config_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[connection\nbaud_rate = ").unwrap();

    let output = dht11_diag(&["--mock", "--config", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
}
