//! Simulated sensor firmware
//!
//! `MockAdapter` answers commands the way the board's firmware does, so the
//! whole diagnostic can run without hardware. It also provides:
//! - Controllable failure injection (lost replies)
//! - Fixed reply overrides per command
//! - Call logging for test verification
//!
//! Clones share state, so a test can keep a handle for inspection after moving
//! the adapter into a validator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::Transport;
use crate::error::CommunicationError;
use crate::protocol::{
    Command, TemperatureUnit, DEFAULT_AVERAGING_WINDOW, ERR_INVALID_PARAMETER, ERR_UNKNOWN_COMMAND,
};

/// Identification string reported by the simulated board.
pub const SIMULATED_IDN: &str = "GSU-Lab,DHT11-SCPI,SIM0001,1.2.0";

/// Largest averaging window the firmware accepts.
pub const MAX_AVERAGING_WINDOW: u32 = 16;

/// State and command handling of the simulated firmware.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    /// Unit of `MEAS:TEMP?` and `MEAS:ALL?` replies
    pub unit: TemperatureUnit,
    /// Current `CONF:AVG` window
    pub averaging: u32,
    /// Always stored in Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Reported by `SYST:INTV?`
    pub interval_ms: u32,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::Celsius,
            averaging: DEFAULT_AVERAGING_WINDOW,
            temperature_c: 23.5,
            humidity: 45.0,
            interval_ms: 2000,
        }
    }
}

impl SimulatedDevice {
    /// Temperature in the currently configured unit.
    pub fn temperature(&self) -> f64 {
        match self.unit {
            TemperatureUnit::Celsius => self.temperature_c,
            TemperatureUnit::Fahrenheit => self.temperature_c * 9.0 / 5.0 + 32.0,
        }
    }

    /// Restore power-on configuration. Readings are untouched.
    pub fn reset(&mut self) {
        self.unit = TemperatureUnit::Celsius;
        self.averaging = DEFAULT_AVERAGING_WINDOW;
    }

    /// Produce the reply line (without terminator) for one request line.
    pub fn handle(&mut self, line: &str) -> String {
        let line = line.trim();
        let (header, argument) = match line.split_once(char::is_whitespace) {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (line, None),
        };

        match (header.to_ascii_uppercase().as_str(), argument) {
            ("*IDN?", None) => SIMULATED_IDN.to_string(),
            ("*OPC?", None) => "1".to_string(),
            ("*RST", None) => {
                self.reset();
                "OK".to_string()
            }
            ("MEAS:TEMP?", None) => format!("{:.2}", self.temperature()),
            ("MEAS:HUM?", None) => format!("{:.2}", self.humidity),
            ("MEAS:ALL?", None) => {
                format!("TEMP:{:.2},HUM:{:.2}", self.temperature(), self.humidity)
            }
            ("CONF:UNIT?", None) => self.unit.letter().to_string(),
            ("CONF:UNIT", Some(argument)) => match TemperatureUnit::from_letter(argument) {
                Some(unit) => {
                    self.unit = unit;
                    unit.letter().to_string()
                }
                None => ERR_INVALID_PARAMETER.to_string(),
            },
            ("CONF:AVG?", None) => self.averaging.to_string(),
            ("CONF:AVG", Some(argument)) => match argument.parse::<u32>() {
                Ok(window) if (1..=MAX_AVERAGING_WINDOW).contains(&window) => {
                    self.averaging = window;
                    window.to_string()
                }
                _ => ERR_INVALID_PARAMETER.to_string(),
            },
            ("SYST:ERR?", None) => "0,No error".to_string(),
            ("SYST:MODE?", None) => "NORMAL".to_string(),
            ("SYST:INTV?", None) => self.interval_ms.to_string(),
            _ => ERR_UNKNOWN_COMMAND.to_string(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process transport backed by [`SimulatedDevice`]
///
/// # Example
///
/// ```
/// use dht11_diag::adapters::{MockAdapter, Transport};
/// use dht11_diag::protocol::Command;
///
/// let mut adapter = MockAdapter::new();
/// adapter.write_command(&Command::new("CONF:AVG?")).unwrap();
/// assert_eq!(adapter.read_frame().unwrap(), b"1\n".to_vec());
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    device: Arc<Mutex<SimulatedDevice>>,
    replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
    overrides: Arc<Mutex<HashMap<String, String>>>,
    call_log: Arc<Mutex<Vec<String>>>,
    failures_pending: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a connected adapter with power-on firmware state
    pub fn new() -> Self {
        Self::with_device(SimulatedDevice::default())
    }

    /// Create a connected adapter around a prepared firmware state
    pub fn with_device(device: SimulatedDevice) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            overrides: Arc::new(Mutex::new(HashMap::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
            failures_pending: Arc::new(AtomicUsize::new(0)),
            connected: Arc::new(AtomicBool::new(true)),
            timeout: Duration::from_secs(5),
        }
    }

    /// Timeout reported by simulated lost replies
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Always answer `command` with `reply`, bypassing the firmware logic.
    pub fn with_response(self, command: &str, reply: &str) -> Self {
        lock(&self.overrides).insert(Command::new(command).as_str().to_string(), reply.to_string());
        self
    }

    /// Lose the reply to the next `count` reads; each of them times out.
    pub fn inject_failures(&self, count: usize) {
        self.failures_pending.fetch_add(count, Ordering::SeqCst);
    }

    /// Lose the reply to the next read.
    pub fn inject_next_failure(&self) {
        self.inject_failures(1);
    }

    /// Simulate unplugging (false) or re-plugging (true) the board.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// False after `set_connected(false)`
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the firmware state.
    pub fn device(&self) -> SimulatedDevice {
        lock(&self.device).clone()
    }

    /// Change the simulated environment.
    pub fn set_reading(&self, temperature_c: f64, humidity: f64) {
        let mut device = lock(&self.device);
        device.temperature_c = temperature_c;
        device.humidity = humidity;
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        lock(&self.call_log).clear();
    }

    /// Lines written so far, in order, without the log prefix.
    pub fn commands_received(&self) -> Vec<String> {
        self.call_log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("write: ").map(str::to_string))
            .collect()
    }

    fn log_call(&self, call: String) {
        lock(&self.call_log).push(call);
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CommunicationError> {
        if !self.is_connected() {
            return Err(CommunicationError::Disconnected);
        }

        let text = String::from_utf8_lossy(bytes);
        for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            self.log_call(format!("write: {}", line));

            let reply = match lock(&self.overrides).get(line) {
                Some(reply) => reply.clone(),
                None => lock(&self.device).handle(line),
            };

            let mut frame = reply.into_bytes();
            frame.push(b'\n');
            lock(&self.replies).push_back(frame);
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CommunicationError> {
        if !self.is_connected() {
            return Err(CommunicationError::Disconnected);
        }

        if self.take_failure() {
            // the reply is lost on the wire
            lock(&self.replies).pop_front();
            return Err(CommunicationError::Timeout(self.timeout));
        }

        lock(&self.replies)
            .pop_front()
            .ok_or(CommunicationError::Timeout(self.timeout))
    }

    fn drain(&mut self) -> Result<usize, CommunicationError> {
        let mut replies = lock(&self.replies);
        let flushed = replies.iter().map(Vec::len).sum();
        replies.clear();
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(adapter: &mut MockAdapter, command: &str) -> String {
        adapter.write_command(&Command::new(command)).unwrap();
        let frame = adapter.read_frame().unwrap();
        String::from_utf8(frame).unwrap().trim().to_string()
    }

    #[test]
    fn test_identification() {
        let mut adapter = MockAdapter::new();
        assert_eq!(exchange(&mut adapter, "*IDN?"), SIMULATED_IDN);
    }

    #[test]
    fn test_unit_conversion() {
        let mut adapter = MockAdapter::new();
        adapter.set_reading(25.0, 50.0);
        assert_eq!(exchange(&mut adapter, "MEAS:TEMP?"), "25.00");
        assert_eq!(exchange(&mut adapter, "CONF:UNIT F"), "F");
        assert_eq!(exchange(&mut adapter, "MEAS:TEMP?"), "77.00");
        assert_eq!(exchange(&mut adapter, "MEAS:ALL?"), "TEMP:77.00,HUM:50.00");
    }

    #[test]
    fn test_averaging_window_bounds() {
        let mut adapter = MockAdapter::new();
        assert_eq!(exchange(&mut adapter, "CONF:AVG 4"), "4");
        assert_eq!(exchange(&mut adapter, "CONF:AVG?"), "4");
        assert_eq!(exchange(&mut adapter, "CONF:AVG 99"), ERR_INVALID_PARAMETER);
        assert_eq!(exchange(&mut adapter, "CONF:AVG 0"), ERR_INVALID_PARAMETER);
        assert_eq!(exchange(&mut adapter, "CONF:AVG?"), "4");
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut adapter = MockAdapter::new();
        exchange(&mut adapter, "CONF:AVG 8");
        exchange(&mut adapter, "CONF:UNIT F");
        assert_eq!(exchange(&mut adapter, "*RST"), "OK");
        assert_eq!(adapter.device().averaging, 1);
        assert_eq!(adapter.device().unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn test_unknown_command() {
        let mut adapter = MockAdapter::new();
        assert_eq!(exchange(&mut adapter, "INVALID_COMMAND"), ERR_UNKNOWN_COMMAND);
        assert_eq!(exchange(&mut adapter, "*IDN? extra"), ERR_UNKNOWN_COMMAND);
    }

    #[test]
    fn test_failure_injection_consumes_reply() {
        let mut adapter = MockAdapter::new();
        adapter.inject_next_failure();
        adapter.write_command(&Command::new("*OPC?")).unwrap();
        assert!(matches!(adapter.read_frame(), Err(CommunicationError::Timeout(_))));
        // Failure should be consumed and no stale reply left behind
        assert_eq!(exchange(&mut adapter, "SYST:MODE?"), "NORMAL");
    }

    #[test]
    fn test_response_override() {
        let mut adapter = MockAdapter::new().with_response("*IDN?", "garbage");
        assert_eq!(exchange(&mut adapter, "*IDN?"), "garbage");
    }

    #[test]
    fn test_disconnected() {
        let mut adapter = MockAdapter::new();
        adapter.set_connected(false);
        assert!(matches!(
            adapter.write_command(&Command::new("*IDN?")),
            Err(CommunicationError::Disconnected)
        ));
    }

    #[test]
    fn test_call_logging_shared_between_clones() {
        let adapter = MockAdapter::new();
        let mut moved = adapter.clone();
        exchange(&mut moved, "*OPC?");
        assert_eq!(adapter.commands_received(), vec!["*OPC?".to_string()]);
        adapter.clear_log();
        assert!(adapter.call_log().is_empty());
    }
}
