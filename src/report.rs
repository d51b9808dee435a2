//! Audit report aggregation.
//!
//! [`aggregate`] is pure: it only counts findings and stamps the current
//! local time. [`aggregate_at`] takes the timestamp explicitly for tests.
//!
//! JSON shape:
//!
//! ```json
//! {
//!   "compliance_rate": 50,
//!   "passed": 1,
//!   "failed": 1,
//!   "warnings": 0,
//!   "document_results": [
//!     {"document_name": "policy.pdf", "findings": [{"rule": "Data Privacy", "status": "PASS", "details": "ok"}]}
//!   ],
//!   "timestamp": "2024-01-01 12:00:00"
//! }
//! ```
//!
//! `document_errors` and `aborted` appear only when set.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::models::{DocumentFindings, Outcome};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A document that produced no findings because processing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    pub document_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Percentage of findings in the passed bucket, rounded; 0 when empty.
    pub compliance_rate: u32,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub document_results: Vec<DocumentFindings>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_errors: Vec<DocumentError>,
    /// Why the batch stopped early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ComplianceReport {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.warnings
    }

    pub fn with_errors(mut self, errors: Vec<DocumentError>, aborted: Option<String>) -> Self {
        self.document_errors = errors;
        self.aborted = aborted;
        self
    }
}

pub fn aggregate(documents: Vec<DocumentFindings>) -> ComplianceReport {
    aggregate_at(documents, Local::now())
}

pub fn aggregate_at<Tz>(documents: Vec<DocumentFindings>, at: DateTime<Tz>) -> ComplianceReport
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let (mut passed, mut failed, mut warnings) = (0usize, 0usize, 0usize);
    for finding in documents.iter().flat_map(|d| d.findings.iter()) {
        match finding.status.outcome() {
            Outcome::Passed => passed += 1,
            Outcome::Failed => failed += 1,
            Outcome::Warning => warnings += 1,
        }
    }

    ComplianceReport {
        compliance_rate: compliance_rate(passed, passed + failed + warnings),
        passed,
        failed,
        warnings,
        document_results: documents,
        timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        document_errors: Vec::new(),
        aborted: None,
    }
}

/// `round(100 * passed / total)`, or 0 when there are no findings.
pub fn compliance_rate(passed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * passed as f64 / total as f64).round() as u32
}
