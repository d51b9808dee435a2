//! Built-in and file-based compliance rule catalogs.
//!
//! A [`RuleCatalog`] is loaded once at startup and shared read-only by both
//! pipelines. [`RuleCatalog::select`] narrows it to the active rule set.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::config::RulesConfig;
use crate::models::{Rule, Severity};

/// Ordered, immutable list of rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
}

#[derive(Deserialize)]
struct CatalogFile {
    rule: Vec<Rule>,
}

fn rule(id: &str, category: &str, name: &str, description: &str, severity: Severity) -> Rule {
    Rule {
        id: id.to_string(),
        category: category.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        severity,
    }
}

impl RuleCatalog {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        if rules.is_empty() {
            bail!("rule catalog must contain at least one rule");
        }
        Ok(Self { rules })
    }

    /// Resolve a built-in catalog by name (`regulatory` or `security`).
    pub fn builtin(name: &str) -> Result<Self> {
        match name {
            "regulatory" => Ok(Self::regulatory()),
            "security" => Ok(Self::security()),
            other => bail!(
                "Unknown rule catalog: '{}'. Must be regulatory or security.",
                other
            ),
        }
    }

    /// Regulatory-domain catalog used with the hosted model pipeline.
    pub fn regulatory() -> Self {
        let entries = [
            ("Data Privacy", "GDPR and data protection compliance", Severity::Critical),
            ("Financial Reporting", "SOX and financial disclosure requirements", Severity::Critical),
            ("Anti-Corruption", "FCPA and anti-bribery provisions", Severity::Critical),
            ("Employment Law", "Labor regulations and workplace standards", Severity::High),
            ("Environmental", "EPA and environmental regulations", Severity::High),
            ("Intellectual Property", "Patent, trademark, and copyright compliance", Severity::Medium),
            ("Health & Safety", "OSHA and workplace safety requirements", Severity::High),
            ("Export Control", "ITAR and export compliance", Severity::High),
            ("Consumer Protection", "FTC and consumer rights regulations", Severity::High),
            ("Securities Law", "SEC disclosure and trading regulations", Severity::Critical),
            ("Antitrust", "Sherman Act and competition law", Severity::High),
            ("Tax Compliance", "IRS and tax reporting requirements", Severity::High),
            ("Healthcare", "HIPAA and healthcare regulations", Severity::Critical),
            ("Telecommunications", "FCC and telecom regulations", Severity::Medium),
            ("Insurance", "State insurance commission requirements", Severity::Medium),
        ];
        let rules = entries
            .iter()
            .enumerate()
            .map(|(i, (name, description, severity))| {
                rule(
                    &format!("REG_{:03}", i + 1),
                    "Regulatory",
                    name,
                    description,
                    *severity,
                )
            })
            .collect();
        Self { rules }
    }

    /// Information-security catalog. Descriptions are short keyword lists
    /// so they work as retrieval queries.
    pub fn security() -> Self {
        use Severity::*;
        let rules = vec![
            rule("RULE_001", "Data Protection", "Personal Data Encryption", "encrypted data rest transit", Critical),
            rule("RULE_002", "Data Protection", "Data Retention Policy", "retention periods years", High),
            rule("RULE_003", "Access Control", "Multi-Factor Authentication", "MFA mandatory users", Critical),
            rule("RULE_004", "Access Control", "Role-Based Access Control", "RBAC least privilege", High),
            rule("RULE_005", "Incident Response", "Breach Notification", "breaches reported 72 hours", Critical),
            rule("RULE_006", "Incident Response", "Response Plan", "incident response procedures", High),
            rule("RULE_007", "Employee Management", "Background Verification", "background checks employees", Medium),
            rule("RULE_008", "Employee Management", "Security Training", "annual training employees", Medium),
            rule("RULE_009", "Audit and Compliance", "Security Audits", "audits annually", High),
            rule("RULE_010", "Audit and Compliance", "Log Retention", "logs retained 12 months", High),
            rule("RULE_011", "Third-Party", "Vendor Assessment", "vendors security assessment", High),
            rule("RULE_012", "Third-Party", "Data Processing Agreements", "DPAs third parties", Critical),
            rule("RULE_013", "Privacy Rights", "Data Subject Rights", "data access deletion 30 days", Critical),
            rule("RULE_014", "Privacy Rights", "Privacy Notice", "privacy notice collection", High),
            rule("RULE_015", "System Security", "Vulnerability Management", "vulnerabilities patched 30 days", Critical),
        ];
        Self { rules }
    }

    /// Parse a catalog from TOML made of `[[rule]]` tables.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).with_context(|| "Failed to parse rule catalog")?;
        // Findings are matched back to rules by id or name.
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for r in &file.rule {
            if r.name.trim().is_empty() || r.id.trim().is_empty() {
                bail!("every rule needs a non-empty id and name");
            }
            if !ids.insert(r.id.trim().to_lowercase()) {
                bail!("duplicate rule id in catalog: '{}'", r.id);
            }
            if !names.insert(r.name.trim().to_lowercase()) {
                bail!("duplicate rule name in catalog: '{}'", r.name);
            }
        }
        Self::new(file.rule)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule catalog: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load the catalog named by `[rules]`: the custom `file` when set,
    /// otherwise the built-in `catalog_override` or `config.catalog`.
    pub fn from_config(config: &RulesConfig, catalog_override: Option<&str>) -> Result<Self> {
        match &config.file {
            Some(path) => Self::from_file(path),
            None => Self::builtin(catalog_override.unwrap_or(&config.catalog)),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Return the subset matching `selectors` (ids or names, case-insensitive),
    /// in catalog order. An empty selector list selects everything.
    pub fn select(&self, selectors: &[String]) -> Result<Vec<Rule>> {
        if selectors.is_empty() {
            return Ok(self.rules.clone());
        }

        for sel in selectors {
            if !self.rules.iter().any(|r| matches_selector(r, sel)) {
                bail!("Unknown rule: '{}'", sel);
            }
        }

        Ok(self
            .rules
            .iter()
            .filter(|r| selectors.iter().any(|s| matches_selector(r, s)))
            .cloned()
            .collect())
    }
}

fn matches_selector(rule: &Rule, selector: &str) -> bool {
    let sel = selector.trim();
    rule.id.eq_ignore_ascii_case(sel) || rule.name.eq_ignore_ascii_case(sel)
}
