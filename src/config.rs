//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults documented on each field. [`load_config`] validates the parsed
//! result before handing it back.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by neighbouring windows. Must be < `chunk_size`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    120
}

/// `[embedding]` section.
///
/// `provider` is `local`, `ollama`, `openai` or `disabled`. Only `local`
/// keeps document text on this machine: `openai` sends every chunk to
/// the hosted API, and `ollama` sends it to whatever server `url` names.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embed_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Retrieval scoring parameters.
///
/// The evidence thresholds and confidences are coarse heuristics; they are
/// configurable rather than fixed truths.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_compliant_min_evidence")]
    pub compliant_min_evidence: usize,
    #[serde(default = "default_partial_min_evidence")]
    pub partial_min_evidence: usize,
    #[serde(default = "default_compliant_confidence")]
    pub compliant_confidence: f32,
    #[serde(default = "default_partial_confidence")]
    pub partial_confidence: f32,
    #[serde(default = "default_non_compliant_confidence")]
    pub non_compliant_confidence: f32,
    /// When set, every index built during an audit is persisted here.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            compliant_min_evidence: default_compliant_min_evidence(),
            partial_min_evidence: default_partial_min_evidence(),
            compliant_confidence: default_compliant_confidence(),
            partial_confidence: default_partial_confidence(),
            non_compliant_confidence: default_non_compliant_confidence(),
            index_dir: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_compliant_min_evidence() -> usize {
    3
}
fn default_partial_min_evidence() -> usize {
    1
}
fn default_compliant_confidence() -> f32 {
    0.8
}
fn default_partial_confidence() -> f32 {
    0.5
}
fn default_non_compliant_confidence() -> f32 {
    0.3
}

/// Hosted model settings and the retry/backoff schedule around it.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Minimum spacing between outbound requests, process-wide.
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
    /// Whole-document attempts (upload → generate → parse).
    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_upload_retries")]
    pub upload_retries: u32,
    #[serde(default = "default_upload_retry_delay_secs")]
    pub upload_retry_delay_secs: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_ready_poll_secs")]
    pub ready_poll_secs: u64,
    /// Quota backoff is `backoff_base_secs * 2^attempt`.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_format_retry_delay_secs")]
    pub format_retry_delay_secs: u64,
    #[serde(default = "default_transient_retry_delay_secs")]
    pub transient_retry_delay_secs: u64,
    #[serde(default = "default_upload_error_retry_delay_secs")]
    pub upload_error_retry_delay_secs: u64,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_gen_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            min_delay_secs: default_min_delay_secs(),
            max_retries: default_model_max_retries(),
            upload_retries: default_upload_retries(),
            upload_retry_delay_secs: default_upload_retry_delay_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            ready_poll_secs: default_ready_poll_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            format_retry_delay_secs: default_format_retry_delay_secs(),
            transient_retry_delay_secs: default_transient_retry_delay_secs(),
            upload_error_retry_delay_secs: default_upload_error_retry_delay_secs(),
            timeout_secs: default_model_timeout_secs(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_gen_top_k(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_min_delay_secs() -> u64 {
    5
}
fn default_model_max_retries() -> u32 {
    2
}
fn default_upload_retries() -> u32 {
    3
}
fn default_upload_retry_delay_secs() -> u64 {
    2
}
fn default_ready_timeout_secs() -> u64 {
    30
}
fn default_ready_poll_secs() -> u64 {
    2
}
fn default_backoff_base_secs() -> u64 {
    10
}
fn default_format_retry_delay_secs() -> u64 {
    3
}
fn default_transient_retry_delay_secs() -> u64 {
    5
}
fn default_upload_error_retry_delay_secs() -> u64 {
    10
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.95
}
fn default_gen_top_k() -> u32 {
    40
}
fn default_max_output_tokens() -> u32 {
    8192
}

impl ModelConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RulesConfig {
    #[serde(default = "default_catalog")]
    pub catalog: String,
    /// Custom catalog file; replaces the built-in catalog when set.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Rule ids or names forming the active subset. Empty = all.
    #[serde(default)]
    pub select: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            file: None,
            select: Vec::new(),
        }
    }
}

fn default_catalog() -> String {
    "regulatory".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Retrieval
    let r = &config.retrieval;
    if r.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.partial_min_evidence < 1 {
        bail!("retrieval.partial_min_evidence must be >= 1");
    }
    if r.compliant_min_evidence < r.partial_min_evidence {
        bail!("retrieval.compliant_min_evidence must be >= retrieval.partial_min_evidence");
    }
    for (name, value) in [
        ("compliant_confidence", r.compliant_confidence),
        ("partial_confidence", r.partial_confidence),
        ("non_compliant_confidence", r.non_compliant_confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    // Model
    let m = &config.model;
    if !(2..=5).contains(&m.min_delay_secs) {
        bail!("model.min_delay_secs must be between 2 and 5");
    }
    if !(1..=3).contains(&m.max_retries) {
        bail!("model.max_retries must be between 1 and 3");
    }
    if m.upload_retries == 0 {
        bail!("model.upload_retries must be >= 1");
    }
    if !(5..=10).contains(&m.backoff_base_secs) {
        bail!("model.backoff_base_secs must be between 5 and 10");
    }
    if m.ready_poll_secs == 0 {
        bail!("model.ready_poll_secs must be > 0");
    }

    // Rules
    if config.rules.file.is_none() {
        match config.rules.catalog.as_str() {
            "regulatory" | "security" => {}
            other => bail!(
                "Unknown rule catalog: '{}'. Must be regulatory or security.",
                other
            ),
        }
    }

    Ok(())
}
