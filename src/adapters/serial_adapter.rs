//! Serial transport for the sensor board
//!
//! Wraps a blocking `serialport` handle. Reads use a short internal port
//! timeout and loop until either a full frame has arrived or the configured
//! overall timeout is spent.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::SerialPort;

use super::{discovery, wake, Transport};
use crate::config::DiagConfig;
use crate::error::{CommunicationError, DiagError, DiagResult};

/// Internal poll timeout of the OS port; the frame timeout is enforced on top.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on read rounds while draining input.
const MAX_DRAIN_ROUNDS: usize = 50;

/// Serial adapter for the USB-serial link
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Overall time allowed for one reply frame
    timeout: Duration,

    /// Line terminator for commands (e.g., "\n")
    line_terminator: String,

    /// Byte ending each reply frame
    response_delimiter: u8,

    /// Wait between drain rounds
    flush_poll: Duration,

    port: Option<Box<dyn SerialPort>>,

    /// Bytes received past the end of the last frame
    pending: Vec<u8>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyACM0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            response_delimiter: b'\n',
            flush_poll: Duration::from_millis(200),
            port: None,
            pending: Vec::new(),
        }
    }

    /// Set the frame timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Set the byte that ends a reply frame
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Set the wait between drain rounds
    pub fn with_flush_poll(mut self, poll: Duration) -> Self {
        self.flush_poll = poll;
        self
    }

    /// Port this adapter opens
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Open the port.
    pub fn connect(&mut self) -> DiagResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .map_err(|e| {
                DiagError::Connection(format!(
                    "failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;

        self.port = Some(port);
        self.pending.clear();
        debug!("Serial port '{}' opened at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    /// Close the port. Safe to call when not connected.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        self.pending.clear();
    }

    /// Whether the port is open
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Discover, open and prepare the link described by `config`.
    ///
    /// Waits for the board to boot (opening the port resets it), then flushes
    /// stale input and wakes the firmware. Any failure here aborts the run.
    pub fn open(config: &DiagConfig) -> DiagResult<Self> {
        let available = discovery::available_ports()?;
        info!("Available ports: {:?}", available);

        let port_name = discovery::resolve_port(
            &config.connection.port,
            config.connection.auto_detect,
            &available,
        )?;

        let mut adapter = SerialAdapter::new(port_name, config.connection.baud_rate)
            .with_timeout(config.connection.timeout())
            .with_line_terminator(config.connection.line_terminator.clone())
            .with_flush_poll(config.pacing.flush_poll());
        adapter.connect()?;

        let boot_delay = config.connection.boot_delay();
        if !boot_delay.is_zero() {
            info!("Waiting {:?} for the board to boot", boot_delay);
            thread::sleep(boot_delay);
        }

        let flush_poll = config.pacing.flush_poll();
        wake(&mut adapter, flush_poll).map_err(|e| {
            DiagError::Connection(format!("link preparation failed: {}", e))
        })?;

        info!("Connection established on '{}'", adapter.port_name);
        Ok(adapter)
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self
            .pending
            .iter()
            .position(|&b| b == self.response_delimiter)?;
        Some(self.pending.drain(..=pos).collect())
    }
}

fn map_io_error(err: std::io::Error) -> CommunicationError {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            CommunicationError::Disconnected
        }
        _ => CommunicationError::Io(err),
    }
}

impl Transport for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CommunicationError> {
        let port = self.port.as_mut().ok_or(CommunicationError::Disconnected)?;
        port.write_all(bytes).map_err(map_io_error)?;
        port.flush().map_err(map_io_error)?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CommunicationError> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 64];

        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(frame);
            }

            if Instant::now() >= deadline {
                if !self.pending.is_empty() {
                    debug!(
                        "[{}] discarding partial frame {:?}",
                        self.port_name,
                        String::from_utf8_lossy(&self.pending)
                    );
                    self.pending.clear();
                }
                return Err(CommunicationError::Timeout(timeout));
            }

            let port = self.port.as_mut().ok_or(CommunicationError::Disconnected)?;
            match port.read(&mut buffer) {
                Ok(0) => return Err(CommunicationError::Disconnected),
                Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
                // Port poll timeout is shorter than the frame timeout
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(map_io_error(e)),
            }
        }
    }

    fn drain(&mut self) -> Result<usize, CommunicationError> {
        let mut flushed = self.pending.len();
        self.pending.clear();

        let flush_poll = self.flush_poll;
        let port = self.port.as_mut().ok_or(CommunicationError::Disconnected)?;
        for _ in 0..MAX_DRAIN_ROUNDS {
            if !flush_poll.is_zero() {
                thread::sleep(flush_poll);
            }

            let available = port
                .bytes_to_read()
                .map_err(|e| map_io_error(e.into()))? as usize;
            if available == 0 {
                break;
            }

            let mut scratch = vec![0u8; available];
            match port.read(&mut scratch) {
                Ok(n) => flushed += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(map_io_error(e)),
            }
        }
        Ok(flushed)
    }

    fn line_terminator(&self) -> &str {
        &self.line_terminator
    }
}
