//! End-to-end runs of the diagnostic sequence against the simulated firmware.

use std::time::Duration;

use dht11_diag::adapters::{wake, MockAdapter, SimulatedDevice, Transport};
use dht11_diag::config::PacingConfig;
use dht11_diag::ledger::Verdict;
use dht11_diag::protocol::{Command, TemperatureUnit};
use dht11_diag::suite::{run_suite, SuiteOutcome, SuitePlan};
use dht11_diag::validator::ProtocolValidator;

fn plan() -> SuitePlan {
    SuitePlan {
        speed_iterations: 3,
        include_stability: true,
        stability_samples: 4,
        ..SuitePlan::default()
    }
}

fn run(adapter: MockAdapter, plan: &SuitePlan) -> SuiteOutcome {
    let mut validator = ProtocolValidator::new(adapter, PacingConfig::immediate());
    run_suite(&mut validator, plan)
}

fn verdict(outcome: &SuiteOutcome, name: &str) -> Verdict {
    outcome
        .ledger
        .get(name)
        .map(|r| r.verdict)
        .unwrap_or_else(|| panic!("no ledger entry for {}", name))
}

#[test]
fn test_healthy_device_passes_everything() {
    let outcome = run(MockAdapter::new(), &plan());
    let summary = outcome.summary();

    assert_eq!(summary.total, 15);
    assert!(summary.all_passed(), "{:?}", outcome.ledger.failures());

    let id = outcome.identification.as_ref().unwrap();
    assert_eq!(id.model, "DHT11-SCPI");

    let speed = outcome.speed.as_ref().unwrap();
    assert_eq!(speed.attempted, 12);
    assert_eq!(speed.success_rate(), 1.0);

    let stability = outcome.stability.as_ref().unwrap();
    assert_eq!(stability.samples.len(), 4);
}

#[test]
fn test_device_left_in_default_state() {
    let adapter = MockAdapter::new();
    let handle = adapter.clone();
    run(adapter, &plan());

    let device = handle.device();
    assert_eq!(device.unit, TemperatureUnit::Celsius);
    assert_eq!(device.averaging, 1);
}

#[test]
fn test_configuration_restored_to_non_default_values() {
    let device = SimulatedDevice {
        unit: TemperatureUnit::Fahrenheit,
        averaging: 6,
        ..SimulatedDevice::default()
    };
    let adapter = MockAdapter::with_device(device);
    let handle = adapter.clone();
    let mut validator = ProtocolValidator::new(adapter, PacingConfig::immediate());

    let outcome = run_suite(
        &mut validator,
        &SuitePlan {
            speed_iterations: 1,
            ..SuitePlan::default()
        },
    );

    assert_eq!(verdict(&outcome, "CONF:UNIT"), Verdict::Pass);
    assert_eq!(verdict(&outcome, "CONF:AVG"), Verdict::Pass);

    let commands = handle.commands_received();
    assert!(commands.contains(&"CONF:UNIT C".to_string()));
    assert!(commands.contains(&"CONF:UNIT F".to_string()));
    assert!(commands.contains(&"CONF:AVG 6".to_string()));
}

#[test]
fn test_timeout_fails_one_check_and_run_continues() {
    let adapter = MockAdapter::new();
    adapter.inject_next_failure();
    let outcome = run(adapter, &plan());

    let idn = outcome.ledger.get("IDN").unwrap();
    assert_eq!(idn.verdict, Verdict::Fail);
    assert!(idn.detail.as_deref().unwrap().contains("timed out"));
    assert!(outcome.identification.is_none());

    assert_eq!(outcome.summary().failed, 1);
    assert_eq!(outcome.ledger.len(), 15);
}

#[test]
fn test_bad_replies_become_failures() {
    let adapter = MockAdapter::new()
        .with_response("MEAS:TEMP?", "abc")
        .with_response("MEAS:ALL?", "TEMP:21.0")
        .with_response("*IDN?", "Acme,DHT11");
    let outcome = run(adapter, &plan());

    assert_eq!(
        outcome.ledger.get("MEAS:TEMP").unwrap().detail.as_deref(),
        Some("non-numeric response")
    );
    assert_eq!(
        outcome.ledger.get("IDN").unwrap().detail.as_deref(),
        Some("malformed identification string")
    );
    assert_eq!(verdict(&outcome, "MEAS:ALL"), Verdict::Fail);
    // every stability read returns the truncated reply
    assert_eq!(verdict(&outcome, "STABILITY"), Verdict::Fail);
    assert!(outcome.stability.unwrap().samples.is_empty());

    for result in outcome.ledger.failures() {
        assert!(!result.detail.as_deref().unwrap_or("").is_empty());
    }
}

#[test]
fn test_speed_failures_lower_success_rate() {
    let adapter = MockAdapter::new();
    let handle = adapter.clone();
    let mut validator = ProtocolValidator::new(adapter, PacingConfig::immediate());

    let commands = SuitePlan::default_speed_commands();
    handle.inject_failures(2);
    let report = validator.run_speed_sample(&commands, 5);

    assert_eq!(report.attempted, 20);
    assert_eq!(report.failed, 2);
    assert!((report.success_rate() - 18.0 / 20.0).abs() < 1e-12);
}

#[test]
fn test_reset_is_idempotent() {
    for window in [1, 4, 8, 16] {
        let mut adapter = MockAdapter::new();
        wake(&mut adapter, Duration::ZERO).unwrap();
        let mut validator = ProtocolValidator::new(adapter, PacingConfig::immediate());

        let (echo, _) = validator
            .query(&Command::set_averaging(window), Duration::ZERO)
            .unwrap();
        assert_eq!(echo.as_str(), window.to_string());

        validator.query(&Command::new(Command::RST), Duration::ZERO).unwrap();
        let (averaging, _) = validator
            .query(&Command::new(Command::CONF_AVG), Duration::ZERO)
            .unwrap();
        assert_eq!(averaging.as_str(), "1");
    }
}

#[test]
fn test_unknown_and_invalid_commands() {
    let mut adapter = MockAdapter::new();
    for command in ["INVALID_COMMAND", "MEAS:PRESSURE?", "FOO BAR"] {
        adapter.write_command(&Command::new(command)).unwrap();
        let frame = adapter.read_frame().unwrap();
        assert!(String::from_utf8_lossy(&frame).contains("ERR:100"));
    }

    adapter.write_command(&Command::set_averaging(99)).unwrap();
    let frame = adapter.read_frame().unwrap();
    assert!(String::from_utf8_lossy(&frame).contains("ERR:102"));
}
