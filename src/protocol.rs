//! Wire vocabulary of the DHT11 SCPI firmware.
//!
//! Requests are single ASCII lines; every request gets exactly one line back.
//! The transport appends the line terminator, so a [`Command`] holds the bare
//! text only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token contained in the reply to an unrecognized command.
pub const ERR_UNKNOWN_COMMAND: &str = "ERR:100";
/// Token contained in the reply to a command with an invalid parameter.
pub const ERR_INVALID_PARAMETER: &str = "ERR:102";
/// Prefix shared by every error token.
pub const ERR_PREFIX: &str = "ERR:";

/// Averaging window the firmware reports after `*RST`.
pub const DEFAULT_AVERAGING_WINDOW: u32 = 1;

/// A request line sent verbatim to the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(String);

impl Command {
    /// Identification query
    pub const IDN: &'static str = "*IDN?";
    /// Operation-complete query
    pub const OPC: &'static str = "*OPC?";
    /// Reset to factory configuration
    pub const RST: &'static str = "*RST";
    /// Temperature in the configured unit
    pub const MEAS_TEMP: &'static str = "MEAS:TEMP?";
    /// Relative humidity
    pub const MEAS_HUM: &'static str = "MEAS:HUM?";
    /// Composite `TEMP:<f>,HUM:<f>` reading
    pub const MEAS_ALL: &'static str = "MEAS:ALL?";
    /// Current temperature unit
    pub const CONF_UNIT: &'static str = "CONF:UNIT?";
    /// Current averaging window
    pub const CONF_AVG: &'static str = "CONF:AVG?";
    /// Error queue
    pub const SYST_ERR: &'static str = "SYST:ERR?";
    /// Operating mode
    pub const SYST_MODE: &'static str = "SYST:MODE?";
    /// Measurement interval in ms
    pub const SYST_INTV: &'static str = "SYST:INTV?";

    /// Wrap arbitrary request text. Surrounding whitespace is removed so the
    /// transport controls termination.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Command(text.trim().to_string())
    }

    /// `CONF:UNIT <C|F>`
    pub fn set_unit(unit: TemperatureUnit) -> Self {
        Command(format!("CONF:UNIT {}", unit.letter()))
    }

    /// `CONF:AVG <n>`
    pub fn set_averaging(window: u32) -> Self {
        Command(format!("CONF:AVG {}", window))
    }

    /// The request text without terminator.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a query (`?` suffix) rather than a setting.
    pub fn is_query(&self) -> bool {
        self.0.ends_with('?')
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::new(text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(String);

impl Response {
    /// Decode raw frame bytes: non-ASCII bytes are dropped, then the text is
    /// trimmed.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let text: String = raw
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();
        Response(text.trim().to_string())
    }

    /// Build a response from already-decoded text (trimmed).
    pub fn new(text: impl AsRef<str>) -> Self {
        Response(text.as_ref().trim().to_string())
    }

    /// Decoded text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an empty frame
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `ERR:<code>` token carried by this response, if it is one.
    pub fn error_token(&self) -> Option<&str> {
        let start = self.0.find(ERR_PREFIX)?;
        let token = &self.0[start..];
        let end = token
            .char_indices()
            .skip(ERR_PREFIX.len())
            .find(|(_, c)| !c.is_ascii_alphanumeric())
            .map(|(i, _)| i)
            .unwrap_or(token.len());
        Some(&token[..end])
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Temperature unit selectable with `CONF:UNIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    /// Degrees Celsius (`C`)
    Celsius,
    /// Degrees Fahrenheit (`F`)
    Fahrenheit,
}

impl TemperatureUnit {
    /// Letter used on the wire
    pub fn letter(self) -> char {
        match self {
            TemperatureUnit::Celsius => 'C',
            TemperatureUnit::Fahrenheit => 'F',
        }
    }

    /// Parse the unit letter echoed by the firmware.
    pub fn from_letter(text: &str) -> Option<Self> {
        match text.trim() {
            "C" | "c" => Some(TemperatureUnit::Celsius),
            "F" | "f" => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }

    /// Display label used next to temperature values.
    pub fn label(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

/// Fields of an `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    /// Manufacturer
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware version
    pub firmware: String,
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vendor={} model={} serial={} firmware={}",
            self.vendor, self.model, self.serial, self.firmware
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_drops_non_ascii_and_trims() {
        let raw = [b' ', b'2', 0xC2, b'3', b'.', b'5', 0xFF, b'\r', b'\n'];
        assert_eq!(Response::from_bytes(&raw).as_str(), "23.5");
    }

    #[test]
    fn test_error_token_extraction() {
        assert_eq!(Response::new("ERR:100").error_token(), Some("ERR:100"));
        assert_eq!(
            Response::new("ERR:102,Invalid parameter").error_token(),
            Some("ERR:102")
        );
        assert_eq!(Response::new("23.50").error_token(), None);
    }

    #[test]
    fn test_command_builders() {
        assert_eq!(Command::set_unit(TemperatureUnit::Fahrenheit).as_str(), "CONF:UNIT F");
        assert_eq!(Command::set_averaging(4).as_str(), "CONF:AVG 4");
        assert_eq!(Command::new("  *IDN?\n").as_str(), "*IDN?");
        assert!(Command::new(Command::MEAS_ALL).is_query());
        assert!(!Command::new(Command::RST).is_query());
    }

    #[test]
    fn test_unit_letters() {
        assert_eq!(TemperatureUnit::from_letter("F"), Some(TemperatureUnit::Fahrenheit));
        assert_eq!(TemperatureUnit::from_letter(" C "), Some(TemperatureUnit::Celsius));
        assert_eq!(TemperatureUnit::from_letter("K"), None);
    }
}
