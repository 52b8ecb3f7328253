//! Layered configuration using Figment
//!
//! Configuration is merged in this order (later wins):
//! 1. Built-in defaults
//! 2. A TOML file (by default `config/dht11_diag.toml`, skipped when absent)
//! 3. Environment variables prefixed with `DHT11_DIAG_`, using `__` to
//!    separate sections
//!
//! ```text
//! DHT11_DIAG_CONNECTION__PORT=/dev/ttyUSB0
//! DHT11_DIAG_PACING__SETTLE_MS=150
//! DHT11_DIAG_RUN__INCLUDE_STABILITY=true
//! ```
//!
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DiagError, DiagResult};

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/dht11_diag.toml";

const ENV_PREFIX: &str = "DHT11_DIAG_";

/// Upper bound for `run.speed_iterations` and `run.stability_samples`.
pub const MAX_SAMPLE_COUNT: usize = 10_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    /// Logging
    pub application: ApplicationConfig,
    /// Serial link
    pub connection: ConnectionConfig,
    /// Delays between operations
    pub pacing: PacingConfig,
    /// Scope of the run
    pub run: RunConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Baud rate (e.g., 9600, 115200)
    pub baud_rate: u32,
    /// Upper bound on waiting for one reply frame
    pub timeout_ms: u64,
    /// Wait after opening the port; the board resets when DTR toggles
    pub boot_delay_ms: u64,
    /// Fall back to the first available port if `port` is not present
    pub auto_detect: bool,
    /// Appended to every command
    pub line_terminator: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 5000,
            boot_delay_ms: 4000,
            auto_detect: true,
            line_terminator: "\n".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// `timeout_ms` as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `boot_delay_ms` as a `Duration`
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }
}

/// Delays between operations. All of them may be zero (tests do that).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Wait before each regular query
    pub settle_ms: u64,
    /// Wait before each query of the speed sample
    pub speed_settle_ms: u64,
    /// Wait between stability reads; the DHT11 needs ~2 s per conversion
    pub stability_interval_ms: u64,
    /// Poll period while draining stale input
    pub flush_poll_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            speed_settle_ms: 100,
            stability_interval_ms: 3000,
            flush_poll_ms: 200,
        }
    }
}

impl PacingConfig {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            speed_settle_ms: 0,
            stability_interval_ms: 0,
            flush_poll_ms: 0,
        }
    }

    /// `settle_ms` as a `Duration`
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// `speed_settle_ms` as a `Duration`
    pub fn speed_settle(&self) -> Duration {
        Duration::from_millis(self.speed_settle_ms)
    }

    /// `stability_interval_ms` as a `Duration`
    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    /// `flush_poll_ms` as a `Duration`
    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms)
    }
}

/// Which optional parts of the suite run and how long they take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Repetitions of the speed command set
    pub speed_iterations: usize,
    /// Run the stability sample
    pub include_stability: bool,
    /// Number of `MEAS:ALL?` reads in the stability sample
    pub stability_samples: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            speed_iterations: 10,
            include_stability: false,
            stability_samples: 10,
        }
    }
}

impl DiagConfig {
    /// Load from the default path (if present) and the environment.
    pub fn load() -> DiagResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment, then validate.
    ///
    /// A missing file is not an error; the defaults are used instead.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DiagResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DiagConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> DiagResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DiagError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.connection.port.trim().is_empty() {
            return Err(DiagError::Configuration(
                "connection.port must not be empty".to_string(),
            ));
        }

        if self.connection.baud_rate == 0 {
            return Err(DiagError::Configuration(
                "connection.baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.connection.timeout_ms == 0 {
            return Err(DiagError::Configuration(
                "connection.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.run.speed_iterations == 0 || self.run.speed_iterations > MAX_SAMPLE_COUNT {
            return Err(DiagError::Configuration(format!(
                "run.speed_iterations must be between 1 and {}",
                MAX_SAMPLE_COUNT
            )));
        }

        if self.run.include_stability && self.run.stability_samples == 0 {
            return Err(DiagError::Configuration(
                "run.stability_samples must be at least 1 when stability is enabled".to_string(),
            ));
        }

        if self.run.stability_samples > MAX_SAMPLE_COUNT {
            return Err(DiagError::Configuration(format!(
                "run.stability_samples must not exceed {}",
                MAX_SAMPLE_COUNT
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DiagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.pacing.stability_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiagConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.connection, ConnectionConfig::default());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[connection]
port = "/dev/ttyUSB3"
baud_rate = 9600

[run]
include_stability = true
stability_samples = 3
"#
        )
        .unwrap();

        let config = DiagConfig::load_from(file.path()).unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB3");
        assert_eq!(config.connection.baud_rate, 9600);
        // untouched keys keep their defaults
        assert_eq!(config.connection.timeout_ms, 5000);
        assert!(config.run.include_stability);
        assert_eq!(config.run.stability_samples, 3);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = DiagConfig::default();
        config.application.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = DiagConfig::default();
        config.connection.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = DiagConfig::default();
        config.run.speed_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = DiagConfig::default();
        config.run.include_stability = true;
        config.run.stability_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_counts_bounded() {
        let mut config = DiagConfig::default();
        config.run.speed_iterations = MAX_SAMPLE_COUNT;
        config.run.stability_samples = MAX_SAMPLE_COUNT;
        assert!(config.validate().is_ok());

        let mut config = DiagConfig::default();
        config.run.speed_iterations = usize::MAX;
        assert!(config.validate().is_err());

        let mut config = DiagConfig::default();
        config.run.include_stability = true;
        config.run.stability_samples = usize::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run.stability_samples"));
    }
}
