//! Serial port discovery.

use log::{info, warn};

use crate::error::{DiagError, DiagResult};

/// Pick the port to open.
///
/// The configured port wins when it is present. Otherwise, with
/// `auto_detect`, the first available port is used. With nothing to choose
/// from the run cannot start.
pub fn resolve_port(configured: &str, auto_detect: bool, available: &[String]) -> DiagResult<String> {
    if available.iter().any(|p| p == configured) {
        return Ok(configured.to_string());
    }

    if !auto_detect {
        // Some platforms do not enumerate every device node; trust the user.
        warn!("Port '{}' not among detected ports {:?}", configured, available);
        return Ok(configured.to_string());
    }

    match available.first() {
        Some(port) => {
            info!("Port '{}' not found, using detected port '{}'", configured, port);
            Ok(port.clone())
        }
        None => Err(DiagError::Connection("no serial ports found".to_string())),
    }
}

/// Names of the serial ports the OS reports.
#[cfg(feature = "instrument_serial")]
pub fn available_ports() -> DiagResult<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Always fails: serial support is compiled out.
#[cfg(not(feature = "instrument_serial"))]
pub fn available_ports() -> DiagResult<Vec<String>> {
    Err(DiagError::SerialFeatureDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_configured_port_present() {
        let available = ports(&["/dev/ttyUSB0", "/dev/ttyACM0"]);
        assert_eq!(resolve_port("/dev/ttyACM0", true, &available).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_falls_back_to_first_detected() {
        let available = ports(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        assert_eq!(resolve_port("/dev/ttyACM0", true, &available).unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_no_ports_is_connection_error() {
        let err = resolve_port("/dev/ttyACM0", true, &[]).unwrap_err();
        assert!(matches!(err, DiagError::Connection(_)));
    }

    #[test]
    fn test_auto_detect_off_keeps_configured() {
        assert_eq!(resolve_port("COM7", false, &[]).unwrap(), "COM7");
    }
}
