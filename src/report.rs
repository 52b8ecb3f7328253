//! Console and JSON rendering of a finished run.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DiagResult;
use crate::ledger::{LedgerSummary, ResultsLedger};
use crate::protocol::Identification;
use crate::stats::SampleStats;
use crate::suite::SuiteOutcome;
use crate::validator::{SpeedReport, StabilityReport};

const RULE_WIDTH: usize = 72;

/// Where and when a run took place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Port name, or "mock" for the simulated firmware
    pub transport: String,
    /// `None` for the simulated firmware
    pub baud_rate: Option<u32>,
}

impl RunInfo {
    /// Stamp a run starting now
    pub fn new(transport: impl Into<String>, baud_rate: Option<u32>) -> Self {
        Self {
            started_at: Utc::now(),
            transport: transport.into(),
            baud_rate,
        }
    }
}

fn rule(out: &mut String, ch: char) {
    out.push_str(&ch.to_string().repeat(RULE_WIDTH));
    out.push('\n');
}

/// Render the full console report.
pub fn render(info: &RunInfo, outcome: &SuiteOutcome) -> String {
    let mut out = String::new();

    rule(&mut out, '=');
    out.push_str("DHT11 SCPI DIAGNOSTIC\n");
    rule(&mut out, '=');
    out.push_str(&format!(
        "Date:      {}\n",
        info.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Port:      {}\n", info.transport));
    if let Some(baud) = info.baud_rate {
        out.push_str(&format!("Baud rate: {}\n", baud));
    }
    if let Some(id) = &outcome.identification {
        out.push_str(&format!(
            "Device:    {} {} (serial {}, firmware {})\n",
            id.vendor, id.model, id.serial, id.firmware
        ));
    }
    out.push('\n');

    render_checks(&mut out, &outcome.ledger);
    if let Some(speed) = &outcome.speed {
        render_speed(&mut out, speed);
    }
    if let Some(stability) = &outcome.stability {
        render_stability(&mut out, stability);
    }
    render_summary(&mut out, &outcome.ledger);

    out
}

fn render_checks(out: &mut String, ledger: &ResultsLedger) {
    out.push_str("Checks\n");
    rule(out, '-');
    out.push_str(&format!("{:<14} {:<7} {:>12}  {}\n", "Check", "Result", "Latency", "Detail"));
    for result in ledger.iter() {
        out.push_str(&format!(
            "{:<14} {:<7} {:>9.1} ms  {}\n",
            result.name,
            result.verdict.as_str(),
            result.latency.as_secs_f64() * 1000.0,
            result.detail.as_deref().unwrap_or("")
        ));
    }
    out.push('\n');
}

fn format_stats(stats: Option<&SampleStats>) -> String {
    match stats {
        Some(s) => format!(
            "{:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            s.min, s.max, s.mean, s.std_dev
        ),
        None => format!("{:>9} {:>9} {:>9} {:>9}", "-", "-", "-", "-"),
    }
}

fn render_speed(out: &mut String, speed: &SpeedReport) {
    out.push_str(&format!("Speed ({} iterations, ms)\n", speed.iterations));
    rule(out, '-');
    out.push_str(&format!(
        "{:<12} {:>9} {:>9} {:>9} {:>9} {:>7}\n",
        "Command", "Min", "Max", "Mean", "StdDev", "Errors"
    ));
    for timing in &speed.commands {
        out.push_str(&format!(
            "{:<12} {} {:>7}\n",
            timing.command.as_str(),
            format_stats(timing.stats.as_ref()),
            timing.failures
        ));
    }
    out.push_str(&format!(
        "Total queries: {}  Errors: {}  Success rate: {:.1}%\n\n",
        speed.attempted,
        speed.failed,
        speed.success_rate() * 100.0
    ));
}

fn render_stability(out: &mut String, stability: &StabilityReport) {
    out.push_str(&format!(
        "Stability ({} of {} reads)\n",
        stability.samples.len(),
        stability.requested
    ));
    rule(out, '-');
    for (i, sample) in stability.samples.iter().enumerate() {
        out.push_str(&format!(
            "[{}/{}] T = {:.2}, H = {:.2}\n",
            i + 1,
            stability.samples.len(),
            sample.temperature,
            sample.humidity
        ));
    }
    out.push_str(&format!(
        "{:<12} {:>9} {:>9} {:>9} {:>9}\n",
        "Quantity", "Min", "Max", "Mean", "StdDev"
    ));
    out.push_str(&format!(
        "{:<12} {}\n",
        "Temperature",
        format_stats(stability.temperature.as_ref())
    ));
    out.push_str(&format!(
        "{:<12} {}\n",
        "Humidity",
        format_stats(stability.humidity.as_ref())
    ));
    if stability.failed > 0 {
        out.push_str(&format!("Skipped reads: {}\n", stability.failed));
    }
    out.push('\n');
}

fn render_summary(out: &mut String, ledger: &ResultsLedger) {
    let summary = ledger.summary();
    rule(out, '=');
    out.push_str(&format!("SUMMARY: {}/{} checks passed\n", summary.passed, summary.total));

    let failures = ledger.failures();
    if failures.is_empty() {
        out.push_str("All checks passed\n");
    } else {
        out.push_str("Failures:\n");
        for result in failures {
            out.push_str(&format!(
                "  - {}: {}\n",
                result.name,
                result.detail.as_deref().unwrap_or("")
            ));
        }
    }
    rule(out, '=');
}

#[derive(Serialize)]
struct SpeedJson<'a> {
    #[serde(flatten)]
    report: &'a SpeedReport,
    success_rate: f64,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run: &'a RunInfo,
    summary: LedgerSummary,
    identification: Option<&'a Identification>,
    checks: &'a ResultsLedger,
    speed: Option<SpeedJson<'a>>,
    stability: Option<&'a StabilityReport>,
}

/// Export the run as pretty-printed JSON
pub fn to_json(info: &RunInfo, outcome: &SuiteOutcome) -> Result<String, serde_json::Error> {
    let report = JsonReport {
        run: info,
        summary: outcome.summary(),
        identification: outcome.identification.as_ref(),
        checks: &outcome.ledger,
        speed: outcome.speed.as_ref().map(|report| SpeedJson {
            report,
            success_rate: report.success_rate(),
        }),
        stability: outcome.stability.as_ref(),
    };
    serde_json::to_string_pretty(&report)
}

/// Write the JSON report to `path`, replacing any existing file.
pub fn write_json<P: AsRef<Path>>(path: P, info: &RunInfo, outcome: &SuiteOutcome) -> DiagResult<()> {
    let json = to_json(info, outcome).map_err(std::io::Error::from)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::config::PacingConfig;
    use crate::suite::{run_suite, SuitePlan};
    use crate::validator::ProtocolValidator;

    fn outcome(adapter: MockAdapter) -> SuiteOutcome {
        let plan = SuitePlan {
            speed_iterations: 2,
            include_stability: true,
            stability_samples: 3,
            ..SuitePlan::default()
        };
        let mut validator = ProtocolValidator::new(adapter, PacingConfig::immediate());
        run_suite(&mut validator, &plan)
    }

    #[test]
    fn test_console_report_sections() {
        let info = RunInfo::new("/dev/ttyACM0", Some(115_200));
        let text = render(&info, &outcome(MockAdapter::new()));

        assert!(text.contains("Port:      /dev/ttyACM0"));
        assert!(text.contains("Baud rate: 115200"));
        assert!(text.contains("MEAS:ALL?"));
        assert!(text.contains("Temperature"));
        assert!(text.contains("[1/3] T = 23.50, H = 45.00"));
        assert!(text.contains("[3/3] T = 23.50, H = 45.00"));
        assert!(text.contains("SUMMARY: 15/15 checks passed"));
        assert!(text.contains("All checks passed"));
    }

    #[test]
    fn test_console_report_lists_failures() {
        let info = RunInfo::new("mock", None);
        let adapter = MockAdapter::new().with_response("SYST:MODE?", "ERR:100");
        let text = render(&info, &outcome(adapter));

        assert!(!text.contains("Baud rate"));
        assert!(text.contains("Failures:"));
        assert!(text.contains("  - SYST:MODE: device reported ERR:100"));
    }

    #[test]
    fn test_json_report() {
        let info = RunInfo::new("mock", None);
        let json = to_json(&info, &outcome(MockAdapter::new())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["summary"]["failed"], 0);
        assert_eq!(value["checks"][0]["name"], "IDN");
        assert_eq!(value["speed"]["success_rate"], 1.0);
        assert_eq!(value["speed"]["attempted"], 8);
        assert_eq!(value["stability"]["samples"].as_array().map(Vec::len), Some(3));
        assert_eq!(value["identification"]["model"], "DHT11-SCPI");
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let info = RunInfo::new("mock", None);
        write_json(&path, &info, &outcome(MockAdapter::new())).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("\"SPEED_TEST\""));
    }
}
