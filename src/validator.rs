//! Response validation and timed queries.
//!
//! The `validate_*` functions are pure: they look at one decoded [`Response`]
//! and either return the parsed value or the [`CheckError`] explaining why the
//! response is unacceptable. [`ProtocolValidator`] owns the transport and does
//! the actual request/response exchanges, including the repeated speed and
//! stability samples.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::Transport;
use crate::config::PacingConfig;
use crate::error::{CheckError, CommunicationError};
use crate::ledger::CheckResult;
use crate::protocol::{Command, Identification, Response, DEFAULT_AVERAGING_WINDOW};
use crate::stats::SampleStats;

const MALFORMED_IDENTIFICATION: &str = "malformed identification string";
const NON_NUMERIC: &str = "non-numeric response";

/// A single numeric measurement with its unit label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Parsed value
    pub value: f64,
    /// Unit label for display
    pub unit: String,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Parsed `MEAS:ALL?` reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeReading {
    /// In the configured unit
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

impl fmt::Display for CompositeReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temperature={} humidity={}", self.temperature, self.humidity)
    }
}

fn reject_error_token(response: &Response) -> Result<(), CheckError> {
    match response.error_token() {
        Some(token) => Err(CheckError::DeviceReported(token.to_string())),
        None => Ok(()),
    }
}

/// `*IDN?`: at least four comma-separated fields. Anything after the fourth
/// comma stays part of the firmware field.
pub fn validate_identification(response: &Response) -> Result<Identification, CheckError> {
    let fields: Vec<&str> = response.as_str().splitn(4, ',').map(str::trim).collect();
    match fields.as_slice() {
        [vendor, model, serial, firmware] => Ok(Identification {
            vendor: vendor.to_string(),
            model: model.to_string(),
            serial: serial.to_string(),
            firmware: firmware.to_string(),
        }),
        _ => Err(CheckError::validation(MALFORMED_IDENTIFICATION)),
    }
}

/// Single floating-point value such as `MEAS:TEMP?` or `MEAS:HUM?`.
pub fn validate_numeric(response: &Response, unit_label: &str) -> Result<Reading, CheckError> {
    reject_error_token(response)?;
    let value = response
        .as_str()
        .parse::<f64>()
        .map_err(|_| CheckError::validation(NON_NUMERIC))?;
    Ok(Reading {
        value,
        unit: unit_label.to_string(),
    })
}

/// `TEMP:<f>,HUM:<f>`. The field prefixes are optional; exactly two numeric
/// fields are required.
pub fn validate_composite_reading(response: &Response) -> Result<CompositeReading, CheckError> {
    reject_error_token(response)?;
    let stripped = response.as_str().replace("TEMP:", "").replace("HUM:", "");
    let fields: Vec<&str> = stripped.split(',').map(str::trim).collect();
    if fields.len() != 2 {
        return Err(CheckError::validation(format!(
            "expected 2 comma-separated fields, got {}",
            fields.len()
        )));
    }

    let parse = |field: &str| {
        field
            .parse::<f64>()
            .map_err(|_| CheckError::validation(format!("non-numeric field '{}'", field)))
    };
    Ok(CompositeReading {
        temperature: parse(fields[0])?,
        humidity: parse(fields[1])?,
    })
}

/// The response must equal `expected` after trimming.
pub fn validate_echo(response: &Response, expected: &str) -> Result<String, CheckError> {
    let expected = expected.trim();
    if response.as_str() == expected {
        return Ok(expected.to_string());
    }
    reject_error_token(response)?;
    Err(CheckError::validation(format!(
        "expected '{}', got '{}'",
        expected, response
    )))
}

/// The response must contain the error token `code` (e.g. `ERR:100`).
pub fn validate_error_code(response: &Response, code: &str) -> Result<String, CheckError> {
    if response.as_str().contains(code) {
        Ok(code.to_string())
    } else {
        Err(CheckError::validation(format!(
            "expected {}, got '{}'",
            code, response
        )))
    }
}

/// `*RST` acknowledgement followed by a `CONF:AVG?` reply; the averaging
/// window must be back at its factory default.
pub fn validate_reset(ack: &Response, averaging: &Response) -> Result<String, CheckError> {
    reject_error_token(ack)?;
    let expected = DEFAULT_AVERAGING_WINDOW.to_string();
    if averaging.as_str() == expected {
        Ok(format!("averaging window back to {}", expected))
    } else {
        reject_error_token(averaging)?;
        Err(CheckError::validation(format!(
            "averaging window is '{}' after reset, expected '{}'",
            averaging, expected
        )))
    }
}

/// A signed integer such as `SYST:INTV?` or `CONF:AVG?`.
pub fn validate_integer(response: &Response) -> Result<i64, CheckError> {
    reject_error_token(response)?;
    response
        .as_str()
        .parse::<i64>()
        .map_err(|_| CheckError::validation("non-integer response"))
}

/// Any non-empty reply that is not an error token.
pub fn validate_token(response: &Response) -> Result<String, CheckError> {
    let text = validate_present(response)?;
    reject_error_token(response)?;
    Ok(text)
}

/// Any non-empty reply.
pub fn validate_present(response: &Response) -> Result<String, CheckError> {
    if response.is_empty() {
        Err(CheckError::validation("empty response"))
    } else {
        Ok(response.as_str().to_string())
    }
}

/// Latency figures for one command of the speed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTiming {
    /// Command that was repeated
    pub command: Command,
    /// Latency of every successful exchange
    #[serde(skip)]
    pub samples: Vec<Duration>,
    /// Exchanges tried
    pub attempted: usize,
    /// Exchanges that failed
    pub failures: usize,
    /// Milliseconds; `None` when no exchange succeeded
    pub stats: Option<SampleStats>,
}

/// Result of repeating a command set for latency measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedReport {
    /// Repetitions of the command set
    pub iterations: usize,
    /// Per-command figures, in command order
    pub commands: Vec<CommandTiming>,
    /// Exchanges tried over all commands
    pub attempted: usize,
    /// Exchanges that failed
    pub failed: usize,
}

impl SpeedReport {
    /// Exchanges that got a reply
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }

    /// Fraction of queries answered, 0.0..=1.0. An empty sample counts as
    /// fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            1.0
        } else {
            self.succeeded() as f64 / self.attempted as f64
        }
    }

    /// True when every exchange got a reply
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Mean latency over every successful exchange of every command.
    pub fn mean_latency(&self) -> Duration {
        let samples: Vec<Duration> = self
            .commands
            .iter()
            .flat_map(|timing| timing.samples.iter().copied())
            .collect();
        mean_duration(&samples)
    }
}

/// Result of repeated `MEAS:ALL?` reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    /// Reads asked for
    pub requested: usize,
    /// Valid readings, in order
    pub samples: Vec<CompositeReading>,
    /// Reads that failed or were malformed
    pub failed: usize,
    /// Latency of every valid read
    #[serde(skip)]
    pub latencies: Vec<Duration>,
    /// Temperature series statistics
    pub temperature: Option<SampleStats>,
    /// Humidity series statistics
    pub humidity: Option<SampleStats>,
}

impl StabilityReport {
    /// Mean latency of the valid reads
    pub fn mean_latency(&self) -> Duration {
        mean_duration(&self.latencies)
    }
}

fn mean_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = durations.iter().sum();
    match u32::try_from(durations.len()) {
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / durations.len() as f64),
    }
}

/// Runs checks against a device over any [`Transport`].
pub struct ProtocolValidator<T: Transport> {
    transport: T,
    pacing: PacingConfig,
}

impl<T: Transport> ProtocolValidator<T> {
    /// Wrap a prepared transport
    pub fn new(transport: T, pacing: PacingConfig) -> Self {
        Self { transport, pacing }
    }

    /// Delays in use
    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Wait `delay`, send `command` and read one reply frame.
    ///
    /// The returned latency runs from just before the write to just after the
    /// frame was read; the delay is not included.
    pub fn query(
        &mut self,
        command: &Command,
        delay: Duration,
    ) -> Result<(Response, Duration), CommunicationError> {
        let (outcome, latency) = self.timed_query(command, delay);
        outcome.map(|response| (response, latency))
    }

    /// [`query`](Self::query) with the regular settle delay.
    pub fn query_settled(&mut self, command: &Command) -> Result<(Response, Duration), CommunicationError> {
        self.query(command, self.pacing.settle())
    }

    /// Like [`query`](Self::query), but reports the elapsed time also when the
    /// exchange fails.
    ///
    /// After a failed exchange the input is drained, so a reply that arrives
    /// late cannot be mistaken for the answer to the next command.
    pub fn timed_query(
        &mut self,
        command: &Command,
        delay: Duration,
    ) -> (Result<Response, CommunicationError>, Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        debug!("[{}] >> {}", self.transport.name(), command);
        let start = Instant::now();
        let outcome = self
            .transport
            .write_command(command)
            .and_then(|_| self.transport.read_frame())
            .map(|frame| Response::from_bytes(&frame));
        let latency = start.elapsed();

        match &outcome {
            Ok(response) => {
                debug!("[{}] << {} ({:?})", self.transport.name(), response, latency);
            }
            Err(e) => {
                debug!("[{}] {} failed: {}", self.transport.name(), command, e);
                if let Ok(flushed) = self.transport.drain() {
                    if flushed > 0 {
                        debug!("[{}] dropped {} late bytes", self.transport.name(), flushed);
                    }
                }
            }
        }

        (outcome, latency)
    }

    /// Run one single-exchange check: query with the settle delay, then
    /// validate the reply.
    pub fn check<V, F>(&mut self, name: &str, command: &Command, validate: F) -> CheckResult
    where
        V: fmt::Display,
        F: FnOnce(&Response) -> Result<V, CheckError>,
    {
        let (outcome, latency) = self.timed_query(command, self.pacing.settle());
        let outcome = outcome.map_err(CheckError::from).and_then(|r| validate(&r));
        CheckResult::from_outcome(name, latency, outcome)
    }

    /// Send every command of `commands`, `iterations` times over, and collect
    /// latency per command. Failed exchanges are counted, never fatal.
    pub fn run_speed_sample(&mut self, commands: &[Command], iterations: usize) -> SpeedReport {
        let delay = self.pacing.speed_settle();
        let mut timings: Vec<CommandTiming> = commands
            .iter()
            .map(|command| CommandTiming {
                command: command.clone(),
                samples: Vec::new(),
                attempted: 0,
                failures: 0,
                stats: None,
            })
            .collect();

        for iteration in 0..iterations {
            for timing in timings.iter_mut() {
                let (outcome, latency) = self.timed_query(&timing.command, delay);
                timing.attempted += 1;
                match outcome {
                    Ok(_) => timing.samples.push(latency),
                    Err(e) => {
                        timing.failures += 1;
                        warn!(
                            "Speed sample {}/{}: {} failed: {}",
                            iteration + 1,
                            iterations,
                            timing.command,
                            e
                        );
                    }
                }
            }
        }

        for timing in timings.iter_mut() {
            timing.stats = SampleStats::from_durations(&timing.samples);
        }

        let attempted = timings.iter().map(|t| t.attempted).sum();
        let failed = timings.iter().map(|t| t.failures).sum();
        info!("Speed sample: {} queries, {} failed", attempted, failed);

        SpeedReport {
            iterations,
            commands: timings,
            attempted,
            failed,
        }
    }

    /// Read `MEAS:ALL?` `iterations` times, sleeping `delay` between reads.
    /// Failed or malformed reads are logged and skipped.
    pub fn run_stability_sample(&mut self, iterations: usize, delay: Duration) -> StabilityReport {
        let command = Command::new(Command::MEAS_ALL);
        let mut samples = Vec::new();
        let mut latencies = Vec::new();
        let mut failed = 0;

        for i in 0..iterations {
            let wait = if i == 0 { Duration::ZERO } else { delay };
            let (outcome, latency) = self.timed_query(&command, wait);
            match outcome
                .map_err(CheckError::from)
                .and_then(|r| validate_composite_reading(&r))
            {
                Ok(reading) => {
                    debug!("Stability read {}/{}: {}", i + 1, iterations, reading);
                    samples.push(reading);
                    latencies.push(latency);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Stability read {}/{} skipped: {}", i + 1, iterations, e);
                }
            }
        }

        let temperatures: Vec<f64> = samples.iter().map(|s| s.temperature).collect();
        let humidities: Vec<f64> = samples.iter().map(|s| s.humidity).collect();

        StabilityReport {
            requested: iterations,
            temperature: SampleStats::from_values(&temperatures),
            humidity: SampleStats::from_values(&humidities),
            samples,
            failed,
            latencies,
        }
    }
}
