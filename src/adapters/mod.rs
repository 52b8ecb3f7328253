//! Transport implementations
//!
//! This module contains the `Transport` trait, the blocking I/O boundary the
//! validator talks through, and its implementations:
//!
//! - [`SerialAdapter`]: a real serial port via the `serialport` crate
//!   (feature `instrument_serial`)
//! - [`MockAdapter`]: an in-process simulation of the sensor firmware

pub mod discovery;
pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use discovery::resolve_port;
pub use mock_adapter::{MockAdapter, SimulatedDevice};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::CommunicationError;
use crate::protocol::Command;

/// Line sent after connecting to push any half-received garbage out of the
/// firmware's line buffer.
pub const WAKE_LINE: &str = "X";

/// Blocking, one-request-at-a-time link to the device.
pub trait Transport {
    /// Short identifier for logs (port name, "mock", ...)
    fn name(&self) -> &str;

    /// Write raw bytes to the device.
    fn write(&mut self, bytes: &[u8]) -> Result<(), CommunicationError>;

    /// Block until one complete reply frame has arrived or the read timeout
    /// expires. The returned bytes include the delimiter.
    fn read_frame(&mut self) -> Result<Vec<u8>, CommunicationError>;

    /// Discard everything buffered on the input side. Returns the number of
    /// bytes thrown away.
    fn drain(&mut self) -> Result<usize, CommunicationError>;

    /// Terminator appended to every command.
    fn line_terminator(&self) -> &str {
        "\n"
    }

    /// Write `command` followed by the line terminator.
    fn write_command(&mut self, command: &Command) -> Result<(), CommunicationError> {
        let line = format!("{}{}", command.as_str(), self.line_terminator());
        self.write(line.as_bytes())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CommunicationError> {
        (**self).write(bytes)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CommunicationError> {
        (**self).read_frame()
    }

    fn drain(&mut self) -> Result<usize, CommunicationError> {
        (**self).drain()
    }

    fn line_terminator(&self) -> &str {
        (**self).line_terminator()
    }
}

/// Bring a freshly opened link into a known state: drop stale input, send a
/// throw-away line so the firmware discards any partial command, wait for its
/// reply to land and drop that too.
pub fn wake<T: Transport + ?Sized>(
    transport: &mut T,
    settle: Duration,
) -> Result<usize, CommunicationError> {
    let mut flushed = transport.drain()?;
    transport.write_command(&Command::new(WAKE_LINE))?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    flushed += transport.drain()?;
    debug!("[{}] link ready, flushed {} stale bytes", transport.name(), flushed);
    Ok(flushed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_leaves_no_pending_reply() {
        let mut adapter = MockAdapter::new();
        let flushed = wake(&mut adapter, Duration::ZERO).unwrap();
        // the firmware answers "X" with ERR:100 plus newline
        assert_eq!(flushed, "ERR:100\n".len());
        assert!(adapter.read_frame().is_err());
        assert_eq!(adapter.call_log(), vec!["write: X".to_string()]);
    }

    #[test]
    fn test_boxed_transport_delegates() {
        let mut boxed: Box<dyn Transport> = Box::new(MockAdapter::new());
        boxed.write_command(&Command::new(Command::OPC)).unwrap();
        assert_eq!(boxed.read_frame().unwrap(), b"1\n".to_vec());
        assert_eq!(boxed.name(), "mock");
    }
}
