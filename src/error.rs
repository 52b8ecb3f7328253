//! Error types for the diagnostic.
//!
//! Three layers, matching how far an error is allowed to travel:
//!
//! - **`CommunicationError`**: the transport failed to deliver a frame (read
//!   timeout, closed port, I/O failure). Raised by [`crate::adapters::Transport`].
//! - **`CheckError`**: anything that makes a single check FAIL. Wraps
//!   `CommunicationError` and adds `Validation` (a response arrived but has the
//!   wrong shape) and `DeviceReported` (the firmware answered with an `ERR:`
//!   token). A `CheckError` never leaves the check that produced it; the suite
//!   turns it into a FAIL verdict.
//! - **`DiagError`**: run-level failures. Configuration problems and failure to
//!   open the initial connection are the only errors that abort a run.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the run-level error type.
pub type DiagResult<T> = std::result::Result<T, DiagError>;

/// Transport-level failure while exchanging a frame with the device.
#[derive(Error, Debug)]
pub enum CommunicationError {
    /// No complete frame arrived in time
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The port closed or was unplugged
    #[error("connection closed by device")]
    Disconnected,

    /// Any other I/O failure
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason a single check failed.
#[derive(Error, Debug)]
pub enum CheckError {
    /// The exchange itself failed
    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),

    /// The response was received but does not have the expected shape.
    #[error("{0}")]
    Validation(String),

    /// The device answered with an explicit error token.
    #[error("device reported {0}")]
    DeviceReported(String),
}

impl CheckError {
    /// Build a validation failure from any displayable reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        CheckError::Validation(reason.into())
    }

    /// Short machine-friendly name of the error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::Communication(_) => "COMMUNICATION",
            CheckError::Validation(_) => "VALIDATION",
            CheckError::DeviceReported(_) => "DEVICE_REPORTED",
        }
    }
}

/// Run-level error; aborts the diagnostic before or instead of running checks.
#[derive(Error, Debug)]
pub enum DiagError {
    /// The configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The configuration parsed but is invalid
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The port could not be found, opened or prepared
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Error from the `serialport` crate
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// Filesystem or other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial hardware requested without the `instrument_serial` feature
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_error_display() {
        let err = CheckError::validation("non-numeric response");
        assert_eq!(err.to_string(), "non-numeric response");
        assert_eq!(err.kind(), "VALIDATION");

        let err = CheckError::DeviceReported("ERR:102".to_string());
        assert_eq!(err.to_string(), "device reported ERR:102");
    }

    #[test]
    fn test_communication_error_converts() {
        let err: CheckError = CommunicationError::Timeout(Duration::from_millis(250)).into();
        assert_eq!(err.kind(), "COMMUNICATION");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_diag_error_display() {
        let err = DiagError::Connection("no serial ports found".into());
        assert_eq!(err.to_string(), "Connection failed: no serial ports found");
    }
}
