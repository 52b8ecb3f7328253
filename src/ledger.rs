//! Check verdicts and the per-run results ledger.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CheckError;

const UNSPECIFIED_FAILURE: &str = "unspecified failure";

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Check passed
    Pass,
    /// Check failed; the result carries a reason
    Fail,
}

impl Verdict {
    /// True for `Pass`
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// `PASS` or `FAIL`
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one named check.
///
/// Construct through [`CheckResult::pass`], [`CheckResult::fail`] or
/// [`CheckResult::from_outcome`]; a FAIL always carries a non-empty detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check identifier, unique within a run (e.g. `MEAS:TEMP`)
    pub name: String,
    /// PASS or FAIL
    pub verdict: Verdict,
    /// Time from just before the write to just after the reply was read
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    /// Parsed value(s) on PASS, failure reason on FAIL
    pub detail: Option<String>,
}

impl CheckResult {
    /// Passing result; an empty detail is dropped
    pub fn pass(name: impl Into<String>, latency: Duration, detail: Option<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Pass,
            latency,
            detail: detail.filter(|d| !d.is_empty()),
        }
    }

    /// Failing result; an empty reason becomes "unspecified failure"
    pub fn fail(name: impl Into<String>, latency: Duration, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            UNSPECIFIED_FAILURE.to_string()
        } else {
            reason
        };
        Self {
            name: name.into(),
            verdict: Verdict::Fail,
            latency,
            detail: Some(reason),
        }
    }

    /// Convert a typed validator outcome into a ledger record. The `Ok` value's
    /// `Display` becomes the detail.
    pub fn from_outcome<T: fmt::Display>(
        name: impl Into<String>,
        latency: Duration,
        outcome: Result<T, CheckError>,
    ) -> Self {
        match outcome {
            Ok(value) => Self::pass(name, latency, Some(value.to_string())),
            Err(err) => Self::fail(name, latency, err.to_string()),
        }
    }

    /// True when the verdict is PASS
    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Append a note to the detail without changing the verdict.
    pub fn with_note(mut self, note: impl AsRef<str>) -> Self {
        let note = note.as_ref();
        self.detail = Some(match self.detail.take() {
            Some(detail) => format!("{}; {}", detail, note),
            None => note.to_string(),
        });
        self
    }
}

/// Insertion-ordered record of every check verdict in a run.
///
/// Re-recording a name replaces the earlier entry in place (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsLedger {
    entries: Vec<CheckResult>,
}

impl ResultsLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `result`, replacing an entry with the same name in place
    pub fn record(&mut self, result: CheckResult) {
        match self.entries.iter_mut().find(|r| r.name == result.name) {
            Some(existing) => *existing = result,
            None => self.entries.push(result),
        }
    }

    /// Record every result from an iterator, in order.
    pub fn extend(&mut self, results: impl IntoIterator<Item = CheckResult>) {
        for result in results {
            self.record(result);
        }
    }

    /// Entry for check `name`
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.entries.iter().find(|r| r.name == name)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &CheckResult> {
        self.entries.iter()
    }

    /// Number of distinct checks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before any check was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pass/fail counts
    pub fn summary(&self) -> LedgerSummary {
        let passed = self.entries.iter().filter(|r| r.is_pass()).count();
        LedgerSummary {
            total: self.entries.len(),
            passed,
            failed: self.entries.len() - passed,
        }
    }

    /// Checks with a FAIL verdict, in ledger order.
    pub fn failures(&self) -> Vec<&CheckResult> {
        self.entries.iter().filter(|r| !r.is_pass()).collect()
    }
}

/// Pass/fail counts over a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Checks recorded
    pub total: usize,
    /// Checks with a PASS verdict
    pub passed: usize,
    /// Checks with a FAIL verdict
    pub failed: usize,
}

impl LedgerSummary {
    /// True when no check failed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_micros() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    }
}
