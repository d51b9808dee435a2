//! Tolerant parsing of model responses.
//!
//! The model is asked for a bare JSON object but often wraps it in a code
//! fence or surrounds it with prose. [`strip_fences`] applies these rules,
//! in order:
//!
//! 1. Trim surrounding whitespace.
//! 2. If a ```` ```json ```` fence is present, keep the text after the first
//!    one up to the next ```` ``` ```` (or the end when unclosed).
//! 3. Otherwise, if a bare ```` ``` ```` fence is present, keep the text
//!    between the first and second fence (or to the end when unclosed).
//!    A language tag on the opening fence line is dropped.
//! 4. Keep the span from the first `{` to the last `}` inclusive, when both
//!    exist in that order.
//!
//! Anything still not valid JSON is a [`ResponseFormatError`]; there is no
//! attempt to patch broken JSON text.
//!
//! [`reconcile`] then maps the parsed findings onto the requested rules.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::{Finding, Rule, Status};

/// Details used when the model omitted a rule.
pub const MISSING_RULE_DETAILS: &str =
    "No finding returned by the model for this rule. Manual review recommended.";

/// Details used when every attempt returned unparseable output.
pub const UNCLEAR_RESPONSE_DETAILS: &str =
    "Analysis completed but response format was unclear. Manual review recommended.";

#[derive(Debug, Error)]
pub enum ResponseFormatError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response missing 'findings' key")]
    MissingFindings,
    #[error("'findings' must be a list")]
    FindingsNotList,
    #[error("no findings in response")]
    Empty,
    #[error("finding {index} missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
}

/// One finding exactly as the model reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFinding {
    pub rule: String,
    pub status: String,
    pub details: String,
}

pub fn strip_fences(text: &str) -> &str {
    let mut s = text.trim();

    if let Some(pos) = s.find("```json") {
        let rest = &s[pos + "```json".len()..];
        s = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
    } else if let Some(pos) = s.find("```") {
        let mut rest = &s[pos + 3..];
        // Drop a language tag such as ```JSON or ```javascript.
        if let Some(newline) = rest.find('\n') {
            let tag = &rest[..newline];
            if !tag.trim().is_empty() && tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
                rest = &rest[newline + 1..];
            }
        }
        s = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
    }

    let s = s.trim();
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

/// Parse a model response into raw findings.
///
/// The object must carry a non-empty `findings` list whose items all have
/// `rule`, `status` and `details`. A non-string `status` is kept as its JSON
/// text and later coerced to `WARNING`.
pub fn parse_response(text: &str) -> Result<Vec<RawFinding>, ResponseFormatError> {
    let value: Value = serde_json::from_str(strip_fences(text))?;

    let findings = value
        .get("findings")
        .ok_or(ResponseFormatError::MissingFindings)?
        .as_array()
        .ok_or(ResponseFormatError::FindingsNotList)?;
    if findings.is_empty() {
        return Err(ResponseFormatError::Empty);
    }

    findings
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let field = |field: &'static str| {
                item.get(field)
                    .ok_or(ResponseFormatError::MissingField { index, field })
            };
            let rule = field("rule")?;
            let status = field("status")?;
            let details = field("details")?;
            Ok(RawFinding {
                rule: as_text(rule),
                status: as_text(status),
                details: as_text(details),
            })
        })
        .collect()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map raw findings onto `rules`, one finding per rule in rule order.
///
/// A raw finding matches a rule when its `rule` equals the rule's name or
/// id, ignoring case and surrounding whitespace; the first match wins.
/// Unknown statuses become `WARNING`. Rules the model skipped get a
/// `WARNING` asking for manual review. Findings naming no requested rule
/// are logged and dropped.
pub fn reconcile(document: &str, rules: &[Rule], raw: Vec<RawFinding>) -> Vec<Finding> {
    let mut raw: Vec<Option<RawFinding>> = raw.into_iter().map(Some).collect();

    let findings = rules
        .iter()
        .map(|rule| {
            let matched = raw.iter_mut().find_map(|slot| {
                let hit = slot.as_ref().is_some_and(|r| {
                    let name = r.rule.trim();
                    name.eq_ignore_ascii_case(&rule.name) || name.eq_ignore_ascii_case(&rule.id)
                });
                if hit {
                    slot.take()
                } else {
                    None
                }
            });
            match matched {
                Some(r) => {
                    let status = Status::from_model(&r.status);
                    if status == Status::Warning && !r.status.trim().eq_ignore_ascii_case("WARNING")
                    {
                        warn!(document, rule = %rule.name, status = %r.status, "unknown status coerced to WARNING");
                    }
                    Finding::new(rule, status, r.details)
                }
                None => {
                    warn!(document, rule = %rule.name, "model returned no finding for rule");
                    Finding::new(rule, Status::Warning, MISSING_RULE_DETAILS)
                }
            }
        })
        .collect();

    for extra in raw.into_iter().flatten() {
        warn!(document, rule = %extra.rule, "model returned a finding for an unrequested rule");
    }

    findings
}

/// One `WARNING` per rule, used once every attempt failed to parse.
pub fn unclear_response_findings(rules: &[Rule]) -> Vec<Finding> {
    rules
        .iter()
        .map(|rule| Finding::new(rule, Status::Warning, UNCLEAR_RESPONSE_DETAILS))
        .collect()
}
