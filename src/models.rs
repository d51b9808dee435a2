//! Core data models used throughout the compliance checker.
//!
//! These types represent the rules, page segments, chunks, index entries and
//! findings that flow through both audit pipelines.

use serde::{Deserialize, Serialize};

/// Severity attached to a compliance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        }
    }
}

/// A single compliance rule.
///
/// `description` doubles as the retrieval query in the retrieval pipeline
/// and as the rule explanation in the model prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub category: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
}

/// Text extracted from one non-blank PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    /// Document identifier (file name).
    pub source: String,
    /// 1-based page number.
    pub page: u32,
    pub text: String,
}

/// A window of segment text used as the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable within a document: `chunk-{n}` in document order.
    pub id: String,
    pub source: String,
    pub page: u32,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Metadata stored alongside every vector in a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source: String,
    pub page: u32,
    /// First ~200 characters of the chunk text.
    pub excerpt: String,
    pub chunk_id: String,
}

/// Maximum number of characters kept in [`EntryMetadata::excerpt`].
pub const EXCERPT_CHARS: usize = 200;

impl EntryMetadata {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            source: chunk.source.clone(),
            page: chunk.page,
            excerpt: chunk.text.chars().take(EXCERPT_CHARS).collect(),
            chunk_id: chunk.id.clone(),
        }
    }
}

/// Verdict for one rule in one document.
///
/// The model pipeline produces `PASS`/`FAIL`/`WARNING`; the retrieval
/// pipeline produces `COMPLIANT`/`PARTIAL`/`NON_COMPLIANT`. Both map onto
/// the same three report buckets via [`Status::outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pass,
    Fail,
    Warning,
    Compliant,
    Partial,
    NonCompliant,
}

/// Report bucket a [`Status`] is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Warning,
}

impl Status {
    pub fn outcome(&self) -> Outcome {
        match self {
            Status::Pass | Status::Compliant => Outcome::Passed,
            Status::Fail | Status::NonCompliant => Outcome::Failed,
            Status::Warning | Status::Partial => Outcome::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Warning => "WARNING",
            Status::Compliant => "COMPLIANT",
            Status::Partial => "PARTIAL",
            Status::NonCompliant => "NON_COMPLIANT",
        }
    }

    /// Parse a model-reported status. Anything other than `PASS`, `FAIL`
    /// or `WARNING` (after trimming, case-insensitive) becomes `WARNING`.
    pub fn from_model(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" => Status::Pass,
            "FAIL" => Status::Fail,
            _ => Status::Warning,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule's verdict for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Exact rule name as given in the active rule set.
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub status: Status,
    pub details: String,
    /// Retrieval pipeline only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Retrieval pipeline only: number of retrieved chunks with a keyword hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<usize>,
}

impl Finding {
    pub fn new(rule: &Rule, status: Status, details: impl Into<String>) -> Self {
        Self {
            rule: rule.name.clone(),
            rule_id: Some(rule.id.clone()),
            status,
            details: details.into(),
            confidence: None,
            evidence: None,
        }
    }
}

/// All findings for a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFindings {
    pub document_name: String,
    pub findings: Vec<Finding>,
}
