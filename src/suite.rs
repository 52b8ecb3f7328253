//! The fixed diagnostic sequence.
//!
//! Checks run in this order, each adding to the ledger:
//! identification, measurements, configuration round trips, system queries,
//! error handling, speed, stability (optional) and reset. A failing check never
//! stops the run.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::adapters::Transport;
use crate::config::RunConfig;
use crate::error::CheckError;
use crate::ledger::{CheckResult, LedgerSummary, ResultsLedger};
use crate::protocol::{
    Command, Identification, Response, TemperatureUnit, ERR_INVALID_PARAMETER, ERR_UNKNOWN_COMMAND,
};
use crate::validator::{
    validate_composite_reading, validate_echo, validate_error_code, validate_identification,
    validate_integer, validate_numeric, validate_present, validate_reset, validate_token,
    ProtocolValidator, SpeedReport, StabilityReport,
};

/// Sent to provoke the unknown-command error.
pub const INVALID_COMMAND: &str = "INVALID_COMMAND";
/// Averaging window used for the temporary configuration change.
pub const TRIAL_AVERAGING_WINDOW: u32 = 4;
/// Averaging window outside the accepted range.
pub const OUT_OF_RANGE_AVERAGING_WINDOW: u32 = 99;
/// Averaging window set before `*RST` so the reset has something to undo.
pub const PRE_RESET_AVERAGING_WINDOW: u32 = 8;

/// What a run covers.
#[derive(Debug, Clone, PartialEq)]
pub struct SuitePlan {
    /// Commands repeated by the speed sample
    pub speed_commands: Vec<Command>,
    /// Repetitions of `speed_commands`
    pub speed_iterations: usize,
    /// Run the stability sample
    pub include_stability: bool,
    /// Reads in the stability sample
    pub stability_samples: usize,
}

impl SuitePlan {
    /// Plan described by the `[run]` configuration section
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            speed_commands: Self::default_speed_commands(),
            speed_iterations: run.speed_iterations,
            include_stability: run.include_stability,
            stability_samples: run.stability_samples,
        }
    }

    /// `MEAS:TEMP?`, `MEAS:HUM?`, `MEAS:ALL?` and `*IDN?`
    pub fn default_speed_commands() -> Vec<Command> {
        [
            Command::MEAS_TEMP,
            Command::MEAS_HUM,
            Command::MEAS_ALL,
            Command::IDN,
        ]
        .into_iter()
        .map(Command::new)
        .collect()
    }
}

impl Default for SuitePlan {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteOutcome {
    /// One verdict per check
    pub ledger: ResultsLedger,
    /// Parsed `*IDN?` reply, if it was valid
    pub identification: Option<Identification>,
    /// Speed sample figures
    pub speed: Option<SpeedReport>,
    /// Stability sample figures, if it ran
    pub stability: Option<StabilityReport>,
}

impl SuiteOutcome {
    /// Pass/fail counts of the ledger
    pub fn summary(&self) -> LedgerSummary {
        self.ledger.summary()
    }
}

fn record(ledger: &mut ResultsLedger, result: CheckResult) {
    match &result.detail {
        Some(detail) if !result.is_pass() => warn!("{}: FAIL ({})", result.name, detail),
        Some(detail) => info!("{}: PASS ({})", result.name, detail),
        None => info!("{}: {}", result.name, result.verdict),
    }
    ledger.record(result);
}

/// Run the full sequence against an already prepared link.
pub fn run_suite<T: Transport>(validator: &mut ProtocolValidator<T>, plan: &SuitePlan) -> SuiteOutcome {
    info!("Starting diagnostic on '{}'", validator.transport().name());
    let mut ledger = ResultsLedger::new();

    let identification = check_identification(validator, &mut ledger);
    check_measurements(validator, &mut ledger);
    check_unit_round_trip(validator, &mut ledger);
    check_averaging_round_trip(validator, &mut ledger);
    check_system(validator, &mut ledger);
    check_error_handling(validator, &mut ledger);
    let speed = check_speed(validator, plan, &mut ledger);
    let stability = if plan.include_stability {
        Some(check_stability(validator, plan, &mut ledger))
    } else {
        None
    };
    check_reset(validator, &mut ledger);

    let summary = ledger.summary();
    info!(
        "Diagnostic finished: {}/{} checks passed",
        summary.passed, summary.total
    );

    SuiteOutcome {
        ledger,
        identification,
        speed: Some(speed),
        stability,
    }
}

fn check_identification<T: Transport>(
    validator: &mut ProtocolValidator<T>,
    ledger: &mut ResultsLedger,
) -> Option<Identification> {
    let settle = validator.pacing().settle();
    let (outcome, latency) = validator.timed_query(&Command::new(Command::IDN), settle);
    let outcome = outcome
        .map_err(CheckError::from)
        .and_then(|r| validate_identification(&r));

    let identification = outcome.as_ref().ok().cloned();
    record(ledger, CheckResult::from_outcome("IDN", latency, outcome));
    identification
}

/// Unit the device currently reports temperatures in. Falls back to the
/// power-on default when the query does not give a usable answer.
fn active_unit<T: Transport>(validator: &mut ProtocolValidator<T>) -> TemperatureUnit {
    let unit = validator
        .query_settled(&Command::new(Command::CONF_UNIT))
        .map_err(CheckError::from)
        .and_then(|(r, _)| parse_unit(&r));
    match unit {
        Ok(unit) => unit,
        Err(e) => {
            debug!("Temperature unit unknown ({}), assuming Celsius", e);
            TemperatureUnit::Celsius
        }
    }
}

fn check_measurements<T: Transport>(validator: &mut ProtocolValidator<T>, ledger: &mut ResultsLedger) {
    let unit = active_unit(validator).label();
    record(
        ledger,
        validator.check("MEAS:TEMP", &Command::new(Command::MEAS_TEMP), |r| {
            validate_numeric(r, unit)
        }),
    );
    record(
        ledger,
        validator.check("MEAS:HUM", &Command::new(Command::MEAS_HUM), |r| {
            validate_numeric(r, "%")
        }),
    );
    record(
        ledger,
        validator.check(
            "MEAS:ALL",
            &Command::new(Command::MEAS_ALL),
            validate_composite_reading,
        ),
    );
}

/// Sequence of exchanges that together form one check. Latency is the sum of
/// the individual exchanges.
struct Exchanges<'a, T: Transport> {
    validator: &'a mut ProtocolValidator<T>,
    latency: Duration,
}

impl<'a, T: Transport> Exchanges<'a, T> {
    fn new(validator: &'a mut ProtocolValidator<T>) -> Self {
        Self {
            validator,
            latency: Duration::ZERO,
        }
    }

    fn send(&mut self, command: &Command) -> Result<Response, CheckError> {
        let settle = self.validator.pacing().settle();
        let (outcome, latency) = self.validator.timed_query(command, settle);
        self.latency += latency;
        outcome.map_err(CheckError::from)
    }
}

fn opposite(unit: TemperatureUnit) -> TemperatureUnit {
    match unit {
        TemperatureUnit::Celsius => TemperatureUnit::Fahrenheit,
        TemperatureUnit::Fahrenheit => TemperatureUnit::Celsius,
    }
}

fn parse_unit(response: &Response) -> Result<TemperatureUnit, CheckError> {
    TemperatureUnit::from_letter(response.as_str())
        .ok_or_else(|| CheckError::validation(format!("unrecognized unit '{}'", response)))
}

fn parse_window(response: &Response) -> Result<u32, CheckError> {
    let value = validate_integer(response)?;
    u32::try_from(value)
        .map_err(|_| CheckError::validation(format!("invalid averaging window '{}'", response)))
}

/// Switch the temperature unit, verify it, then switch back.
fn check_unit_round_trip<T: Transport>(validator: &mut ProtocolValidator<T>, ledger: &mut ResultsLedger) {
    const NAME: &str = "CONF:UNIT";
    let mut steps = Exchanges::new(validator);
    let query = Command::new(Command::CONF_UNIT);

    let original = match steps.send(&query).and_then(|r| parse_unit(&r)) {
        Ok(unit) => unit,
        Err(e) => {
            let reason = format!("reading current unit: {}", e);
            record(ledger, CheckResult::fail(NAME, steps.latency, reason));
            return;
        }
    };
    let target = opposite(original);
    let target_letter = target.letter().to_string();

    let outcome = steps
        .send(&Command::set_unit(target))
        .and_then(|r| validate_echo(&r, &target_letter))
        .and_then(|_| steps.send(&query))
        .and_then(|r| validate_echo(&r, &target_letter))
        .map(|_| format!("{} -> {}", original.label(), target.label()));

    let restore = steps
        .send(&Command::set_unit(original))
        .and_then(|r| validate_echo(&r, &original.letter().to_string()));

    let mut result = CheckResult::from_outcome(NAME, steps.latency, outcome);
    if let Err(e) = restore {
        warn!("Restoring temperature unit to {} failed: {}", original.letter(), e);
        result = result.with_note(format!("restore to {} failed: {}", original.letter(), e));
    }
    record(ledger, result);
}

/// Change the averaging window, verify it, then put the original back.
fn check_averaging_round_trip<T: Transport>(
    validator: &mut ProtocolValidator<T>,
    ledger: &mut ResultsLedger,
) {
    const NAME: &str = "CONF:AVG";
    let mut steps = Exchanges::new(validator);
    let query = Command::new(Command::CONF_AVG);

    let original = match steps.send(&query).and_then(|r| parse_window(&r)) {
        Ok(window) => window,
        Err(e) => {
            let reason = format!("reading current averaging window: {}", e);
            record(ledger, CheckResult::fail(NAME, steps.latency, reason));
            return;
        }
    };
    let target = TRIAL_AVERAGING_WINDOW.to_string();

    let outcome = steps
        .send(&Command::set_averaging(TRIAL_AVERAGING_WINDOW))
        .and_then(|r| validate_echo(&r, &target))
        .and_then(|_| steps.send(&query))
        .and_then(|r| validate_echo(&r, &target))
        .map(|_| format!("{} -> {}", original, target));

    let restore = steps
        .send(&Command::set_averaging(original))
        .and_then(|r| validate_echo(&r, &original.to_string()));

    let mut result = CheckResult::from_outcome(NAME, steps.latency, outcome);
    if let Err(e) = restore {
        warn!("Restoring averaging window to {} failed: {}", original, e);
        result = result.with_note(format!("restore to {} failed: {}", original, e));
    }
    record(ledger, result);
}

fn check_system<T: Transport>(validator: &mut ProtocolValidator<T>, ledger: &mut ResultsLedger) {
    record(
        ledger,
        validator.check("OPC", &Command::new(Command::OPC), validate_token),
    );
    record(
        ledger,
        validator.check("SYST:ERR", &Command::new(Command::SYST_ERR), validate_present),
    );
    record(
        ledger,
        validator.check("SYST:MODE", &Command::new(Command::SYST_MODE), validate_token),
    );
    record(
        ledger,
        validator.check("SYST:INTV", &Command::new(Command::SYST_INTV), |r| {
            validate_integer(r).map(|ms| format!("{} ms", ms))
        }),
    );
}

fn check_error_handling<T: Transport>(validator: &mut ProtocolValidator<T>, ledger: &mut ResultsLedger) {
    record(
        ledger,
        validator.check("ERR_HANDLING", &Command::new(INVALID_COMMAND), |r| {
            validate_error_code(r, ERR_UNKNOWN_COMMAND)
        }),
    );
    record(
        ledger,
        validator.check(
            "ERR_PARAM",
            &Command::set_averaging(OUT_OF_RANGE_AVERAGING_WINDOW),
            |r| validate_error_code(r, ERR_INVALID_PARAMETER),
        ),
    );
}

fn check_speed<T: Transport>(
    validator: &mut ProtocolValidator<T>,
    plan: &SuitePlan,
    ledger: &mut ResultsLedger,
) -> SpeedReport {
    let report = validator.run_speed_sample(&plan.speed_commands, plan.speed_iterations);
    let rate = report.success_rate() * 100.0;

    let result = if report.all_succeeded() {
        CheckResult::pass(
            "SPEED_TEST",
            report.mean_latency(),
            Some(format!("{:.1}% success ({} queries)", rate, report.attempted)),
        )
    } else {
        CheckResult::fail(
            "SPEED_TEST",
            report.mean_latency(),
            format!(
                "{:.1}% success ({} of {} queries failed)",
                rate, report.failed, report.attempted
            ),
        )
    };
    record(ledger, result);
    report
}

fn check_stability<T: Transport>(
    validator: &mut ProtocolValidator<T>,
    plan: &SuitePlan,
    ledger: &mut ResultsLedger,
) -> StabilityReport {
    let interval = validator.pacing().stability_interval();
    info!(
        "Stability sample: {} reads, {:?} apart",
        plan.stability_samples, interval
    );
    let report = validator.run_stability_sample(plan.stability_samples, interval);

    let result = match (&report.temperature, &report.humidity) {
        (Some(temperature), Some(humidity)) if report.failed == 0 => CheckResult::pass(
            "STABILITY",
            report.mean_latency(),
            Some(format!(
                "{} samples, temperature {:.2} ± {:.2}, humidity {:.2} ± {:.2}",
                report.samples.len(),
                temperature.mean,
                temperature.std_dev,
                humidity.mean,
                humidity.std_dev
            )),
        ),
        _ => CheckResult::fail(
            "STABILITY",
            report.mean_latency(),
            format!("{} of {} reads failed", report.failed, report.requested),
        ),
    };
    record(ledger, result);
    report
}

/// Dirty the configuration, reset, and confirm the factory default is back.
fn check_reset<T: Transport>(validator: &mut ProtocolValidator<T>, ledger: &mut ResultsLedger) {
    const NAME: &str = "RESET";
    let mut steps = Exchanges::new(validator);
    let window = PRE_RESET_AVERAGING_WINDOW.to_string();

    // Only the post-reset query decides the verdict
    let outcome = steps
        .send(&Command::set_averaging(PRE_RESET_AVERAGING_WINDOW))
        .and_then(|prepared| {
            if prepared.as_str() != window {
                debug!("Pre-reset CONF:AVG {} answered '{}'", window, prepared);
            }
            let ack = steps.send(&Command::new(Command::RST))?;
            let averaging = steps.send(&Command::new(Command::CONF_AVG))?;
            validate_reset(&ack, &averaging)
        });

    record(ledger, CheckResult::from_outcome(NAME, steps.latency, outcome));
}
