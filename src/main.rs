//! dht11_diag command-line entry point
//!
//! Exit codes: 0 when every check passed, 1 on a configuration or connection
//! error, 2 when at least one check failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dht11_diag::adapters::{self, discovery, MockAdapter, Transport};
use dht11_diag::config::{DiagConfig, PacingConfig, DEFAULT_CONFIG_PATH};
use dht11_diag::report::{self, RunInfo};
use dht11_diag::suite::{run_suite, SuiteOutcome, SuitePlan};
use dht11_diag::validator::ProtocolValidator;

#[derive(Parser, Debug)]
#[command(name = "dht11_diag", version, about = "DHT11 SCPI serial diagnostic")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyACM0 or COM3
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Include the (slow) stability sample
    #[arg(long)]
    stability: bool,

    /// Repetitions of the speed command set
    #[arg(long)]
    speed_iterations: Option<usize>,

    /// Number of stability reads
    #[arg(long)]
    stability_samples: Option<usize>,

    /// Run against the simulated firmware instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Also write the report as JSON to this file
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// List detected serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn apply(&self, config: &mut DiagConfig) {
        if let Some(port) = &self.port {
            config.connection.port = port.clone();
            // an explicit port must not be swapped for a detected one
            config.connection.auto_detect = false;
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.connection.timeout_ms = timeout_ms;
        }
        if self.stability {
            config.run.include_stability = true;
        }
        if let Some(iterations) = self.speed_iterations {
            config.run.speed_iterations = iterations;
        }
        if let Some(samples) = self.stability_samples {
            config.run.stability_samples = samples;
        }
    }

    fn log_filter(&self, configured: &str) -> EnvFilter {
        let level = match self.verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

fn load_config(cli: &Cli) -> Result<DiagConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            DiagConfig::load_from(path)
        }
        None => DiagConfig::load_from(DEFAULT_CONFIG_PATH),
    }
    .context("Failed to load configuration")?;

    cli.apply(&mut config);
    config.validate().context("Invalid command-line options")?;
    Ok(config)
}

fn run<T: Transport>(transport: T, pacing: PacingConfig, plan: &SuitePlan) -> SuiteOutcome {
    let mut validator = ProtocolValidator::new(transport, pacing);
    run_suite(&mut validator, plan)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter(&config.application.log_level))
        .with_writer(std::io::stderr)
        .init();

    if cli.list_ports {
        let ports = discovery::available_ports().context("Failed to list serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let plan = SuitePlan::from_config(&config.run);

    let (info, outcome) = if cli.mock {
        info!("Using simulated firmware");
        let mut adapter = MockAdapter::new().with_timeout(config.connection.timeout());
        adapters::wake(&mut adapter, std::time::Duration::ZERO)
            .context("Failed to prepare simulated link")?;
        let info = RunInfo::new(adapter.name(), None);
        (info, run(adapter, PacingConfig::immediate(), &plan))
    } else {
        open_serial(&config, &plan)?
    };

    print!("{}", report::render(&info, &outcome));

    if let Some(path) = &cli.json {
        report::write_json(path, &info, &outcome)
            .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
        info!("JSON report written to {}", path.display());
    }

    let summary = outcome.summary();
    if summary.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("{} of {} checks failed", summary.failed, summary.total);
        Ok(ExitCode::from(2))
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial(config: &DiagConfig, plan: &SuitePlan) -> Result<(RunInfo, SuiteOutcome)> {
    let adapter = adapters::SerialAdapter::open(config).context("Could not open the sensor link")?;
    let info = RunInfo::new(adapter.port_name(), Some(adapter.baud_rate()));
    Ok((info, run(adapter, config.pacing.clone(), plan)))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_config: &DiagConfig, _plan: &SuitePlan) -> Result<(RunInfo, SuiteOutcome)> {
    Err(dht11_diag::DiagError::SerialFeatureDisabled).context("Use --mock to run without hardware")
}
