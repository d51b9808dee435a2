//! Retrieval-based rule scoring (the retrieval audit pipeline).
//!
//! For every rule the scorer embeds `rule.description`, retrieves the
//! `top_k` nearest chunks from the document's index, and counts how many
//! of them mention at least one of the description's keywords. That count
//! (the *evidence*) maps onto a verdict through [`VerdictPolicy`].
//!
//! This is a deliberately coarse proxy, not a semantic judgment: keywords
//! are the whitespace-separated words of the description, lowercased, and
//! matched as plain substrings of the lowercased chunk text. There is no
//! stemming and no fuzzy matching. A chunk counts once no matter how many
//! keywords it contains.
//!
//! # Default policy
//!
//! | Evidence | Status          | Confidence |
//! |----------|-----------------|------------|
//! | ≥ 3      | `COMPLIANT`     | 0.8        |
//! | 1–2      | `PARTIAL`       | 0.5        |
//! | 0        | `NON_COMPLIANT` | 0.3        |
//!
//! The thresholds and confidences come from `[retrieval]` in the config.

use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::index::VectorIndex;
use crate::models::{Chunk, Finding, Rule, Status};

/// Maps an evidence count to a status and confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictPolicy {
    pub compliant_min_evidence: usize,
    pub partial_min_evidence: usize,
    pub compliant_confidence: f32,
    pub partial_confidence: f32,
    pub non_compliant_confidence: f32,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl VerdictPolicy {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            compliant_min_evidence: config.compliant_min_evidence,
            partial_min_evidence: config.partial_min_evidence,
            compliant_confidence: config.compliant_confidence,
            partial_confidence: config.partial_confidence,
            non_compliant_confidence: config.non_compliant_confidence,
        }
    }

    pub fn verdict(&self, evidence: usize) -> (Status, f32) {
        if evidence >= self.compliant_min_evidence {
            (Status::Compliant, self.compliant_confidence)
        } else if evidence >= self.partial_min_evidence {
            (Status::Partial, self.partial_confidence)
        } else {
            (Status::NonCompliant, self.non_compliant_confidence)
        }
    }
}

/// Lowercased whitespace-separated words of a rule description.
pub fn keyword_tokens(description: &str) -> Vec<String> {
    description
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Number of texts containing at least one token.
pub fn count_evidence<'a>(texts: impl IntoIterator<Item = &'a str>, tokens: &[String]) -> usize {
    if tokens.is_empty() {
        return 0;
    }
    texts
        .into_iter()
        .filter(|text| {
            let lower = text.to_lowercase();
            tokens.iter().any(|t| lower.contains(t.as_str()))
        })
        .count()
}

/// Scores rules against one document's built index.
///
/// Holds only shared references: the index is read-only for the lifetime
/// of the scorer.
pub struct RetrievalScorer<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    policy: VerdictPolicy,
    top_k: usize,
    /// Full chunk text by chunk id. Hits missing here fall back to the
    /// stored excerpt.
    texts: HashMap<&'a str, &'a str>,
}

impl<'a> RetrievalScorer<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        chunks: &'a [Chunk],
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            policy: VerdictPolicy::from_config(config),
            top_k: config.top_k,
            texts: chunks
                .iter()
                .map(|c| (c.id.as_str(), c.text.as_str()))
                .collect(),
        }
    }

    /// Score a single rule.
    pub async fn score_rule(&self, rule: &Rule) -> Result<Finding> {
        let query = embed_query(self.embedder, &rule.description)
            .await
            .with_context(|| format!("embedding query for rule {}", rule.id))?;
        let hits = self
            .index
            .search(&query, self.top_k)
            .await
            .with_context(|| format!("searching index for rule {}", rule.id))?;

        let tokens = keyword_tokens(&rule.description);
        let evidence = count_evidence(
            hits.iter().map(|hit| {
                self.texts
                    .get(hit.metadata.chunk_id.as_str())
                    .copied()
                    .unwrap_or(hit.metadata.excerpt.as_str())
            }),
            &tokens,
        );
        let (status, confidence) = self.policy.verdict(evidence);

        debug!(rule = %rule.id, hits = hits.len(), evidence, status = %status, "scored rule");

        let mut finding = Finding::new(
            rule,
            status,
            format!(
                "{} of {} retrieved passages mention the rule keywords",
                evidence,
                hits.len()
            ),
        );
        finding.confidence = Some(confidence);
        finding.evidence = Some(evidence);
        Ok(finding)
    }

    /// Score every rule, in order, yielding exactly one finding per rule.
    ///
    /// A rule whose retrieval fails is reported `NON_COMPLIANT` with the
    /// error in its details; the remaining rules are still scored.
    pub async fn score_rules(&self, rules: &[Rule]) -> Vec<Finding> {
        let mut findings = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.score_rule(rule).await {
                Ok(finding) => findings.push(finding),
                Err(e) => {
                    warn!(rule = %rule.id, error = %format!("{:#}", e), "retrieval failed");
                    let mut finding = Finding::new(
                        rule,
                        Status::NonCompliant,
                        format!("retrieval failed: {:#}", e),
                    );
                    finding.confidence = Some(self.policy.non_compliant_confidence);
                    finding.evidence = Some(0);
                    findings.push(finding);
                }
            }
        }
        findings
    }
}
