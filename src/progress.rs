//! Audit progress reporting.
//!
//! Reports coarse progress during `ccheck audit` and `ccheck index` so users
//! see which document is being processed and how far embedding has got.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! Reporting is advisory: the pipelines behave identically with
//! [`NoProgress`].

use std::io::Write;

use crate::analyzer::AttemptState;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum AuditProgressEvent {
    /// Starting document `n` of `total` (1-based).
    Document { name: String, n: u64, total: u64 },
    /// `n` of `total` chunks embedded for the current document.
    Embedding { name: String, n: u64, total: u64 },
    /// Model pipeline state transition within one attempt.
    Attempt {
        name: String,
        attempt: u32,
        state: AttemptState,
    },
    /// A retry was scheduled after `delay_secs`.
    Retry {
        name: String,
        attempt: u32,
        delay_secs: f64,
        reason: String,
    },
}

/// Reports audit progress. Implementations write to stderr (human or JSON).
pub trait AuditProgressReporter: Send + Sync {
    fn report(&self, event: AuditProgressEvent);
}

/// Human-friendly progress on stderr: "audit  policy.pdf  2 / 5 documents".
pub struct StderrProgress;

impl AuditProgressReporter for StderrProgress {
    fn report(&self, event: AuditProgressEvent) {
        let line = match &event {
            AuditProgressEvent::Document { name, n, total } => {
                format!(
                    "audit  {}  {} / {} documents\n",
                    name,
                    format_number(*n),
                    format_number(*total)
                )
            }
            AuditProgressEvent::Embedding { name, n, total } => {
                format!(
                    "audit  {}  embedding  {} / {} chunks\n",
                    name,
                    format_number(*n),
                    format_number(*total)
                )
            }
            AuditProgressEvent::Attempt {
                name,
                attempt,
                state,
            } => format!("audit  {}  attempt {}  {}\n", name, attempt + 1, state),
            AuditProgressEvent::Retry {
                name,
                attempt,
                delay_secs,
                reason,
            } => format!(
                "audit  {}  attempt {} failed ({}), retrying in {:.1}s\n",
                name,
                attempt + 1,
                reason,
                delay_secs
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AuditProgressReporter for JsonProgress {
    fn report(&self, event: AuditProgressEvent) {
        let obj = match &event {
            AuditProgressEvent::Document { name, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "document",
                "document": name,
                "n": n,
                "total": total
            }),
            AuditProgressEvent::Embedding { name, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "document": name,
                "n": n,
                "total": total
            }),
            AuditProgressEvent::Attempt {
                name,
                attempt,
                state,
            } => serde_json::json!({
                "event": "progress",
                "phase": "attempt",
                "document": name,
                "attempt": attempt + 1,
                "state": state.to_string()
            }),
            AuditProgressEvent::Retry {
                name,
                attempt,
                delay_secs,
                reason,
            } => serde_json::json!({
                "event": "retry",
                "document": name,
                "attempt": attempt + 1,
                "delay_secs": delay_secs,
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AuditProgressReporter for NoProgress {
    fn report(&self, _event: AuditProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value. `auto` picks human output on a TTY.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Use auto, human, json, or off.",
                other
            ),
        }
    }

    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AuditProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
