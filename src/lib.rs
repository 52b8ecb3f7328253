//! Bench diagnostic for a DHT11 sensor board speaking a SCPI-style protocol
//! over a serial link.
//!
//! A run opens the link, sends a fixed sequence of request/response checks
//! ([`suite::run_suite`]), records a verdict per check in a
//! [`ledger::ResultsLedger`] and renders the result ([`report`]).
//!
//! ```no_run
//! use dht11_diag::adapters::SerialAdapter;
//! use dht11_diag::config::DiagConfig;
//! use dht11_diag::suite::{run_suite, SuitePlan};
//! use dht11_diag::validator::ProtocolValidator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DiagConfig::load()?;
//! let adapter = SerialAdapter::open(&config)?;
//! let mut validator = ProtocolValidator::new(adapter, config.pacing.clone());
//! let outcome = run_suite(&mut validator, &SuitePlan::from_config(&config.run));
//! println!("{}/{} passed", outcome.summary().passed, outcome.summary().total);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod report;
pub mod stats;
pub mod suite;
pub mod validator;

pub use error::{CheckError, CommunicationError, DiagError, DiagResult};
