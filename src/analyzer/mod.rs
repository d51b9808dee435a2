//! Hosted-model document analysis (the model audit pipeline).
//!
//! Each document goes through up to `max_retries` whole attempts. One
//! attempt walks these states:
//!
//! ```text
//! PENDING → UPLOADING → WAITING_ACTIVE → GENERATING → PARSING → DONE
//!                                                        ↘ RETRYING | FAILED
//! ```
//!
//! - **Uploading** stages the bytes in a temporary file and uploads it,
//!   retrying the upload itself `upload_retries` times.
//! - **Waiting active** polls the attachment until the service reports it
//!   ready, bounded by `ready_timeout_secs`.
//! - **Generating** sends the prompt with the attachment.
//! - **Parsing** runs [`parse::parse_response`] and [`parse::reconcile`].
//!
//! Every upload and generate call first passes the shared [`RateLimiter`].
//! Whatever the outcome, the attempt deletes the remote attachment and the
//! local temporary file before returning.
//!
//! What happens after a failed attempt is decided by [`RetryPolicy`], a pure
//! function of the attempt number and the [`FailureKind`]:
//!
//! | Failure          | Not last attempt              | Last attempt             |
//! |------------------|-------------------------------|--------------------------|
//! | Authentication   | fail, never retried           | fail                     |
//! | Quota            | wait `base * 2^attempt`       | fail                     |
//! | Response format  | wait `format_retry_delay`     | one `WARNING` per rule   |
//! | Upload/file      | wait `upload_error_retry_delay` | fail                   |
//! | Other transient  | wait `transient_retry_delay`  | fail                     |
//!
//! Progress is reported as [`AuditProgressEvent`]s; the state machine never
//! prints.

pub mod client;
pub mod gemini;
pub mod parse;
pub mod prompt;
pub mod rate_limit;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use client::{FileState, ModelClient, RemoteFile, ServiceError, ServiceErrorKind};
pub use gemini::GeminiClient;
pub use parse::ResponseFormatError;
pub use rate_limit::{Clock, RateLimiter, TokioClock};

use crate::config::ModelConfig;
use crate::extract::MIME_PDF;
use crate::models::{Finding, Rule};
use crate::progress::{AuditProgressEvent, AuditProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Uploading,
    WaitingActive,
    Generating,
    Parsing,
    Done,
    Retrying,
    Failed,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Pending => "PENDING",
            AttemptState::Uploading => "UPLOADING",
            AttemptState::WaitingActive => "WAITING_ACTIVE",
            AttemptState::Generating => "GENERATING",
            AttemptState::Parsing => "PARSING",
            AttemptState::Done => "DONE",
            AttemptState::Retrying => "RETRYING",
            AttemptState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Authentication,
    Format,
    Upload,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    /// Give up and synthesize `WARNING` findings.
    Degrade,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per document, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub format_delay: Duration,
    pub upload_delay: Duration,
    pub transient_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            format_delay: Duration::from_secs(config.format_retry_delay_secs),
            upload_delay: Duration::from_secs(config.upload_error_retry_delay_secs),
            transient_delay: Duration::from_secs(config.transient_retry_delay_secs),
        }
    }

    /// Decide what follows failed attempt `attempt` (0-based).
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        let last = attempt + 1 >= self.max_attempts;
        match kind {
            FailureKind::Authentication => RetryDecision::Fail,
            FailureKind::Format if last => RetryDecision::Degrade,
            _ if last => RetryDecision::Fail,
            FailureKind::Quota => {
                RetryDecision::Retry(self.backoff_base * 2u32.saturating_pow(attempt))
            }
            FailureKind::Format => RetryDecision::Retry(self.format_delay),
            FailureKind::Upload => RetryDecision::Retry(self.upload_delay),
            FailureKind::Transient => RetryDecision::Retry(self.transient_delay),
        }
    }
}

/// Terminal outcome for one document.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Credentials were rejected. The rest of the batch should be aborted.
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("quota exceeded after {attempts} attempts: {message}")]
    QuotaExhausted { attempts: u32, message: String },
    #[error("analysis failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
}

impl AnalysisError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, AnalysisError::Authentication(_))
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("file upload failed: {0}")]
    Upload(ServiceError),
    #[error("{0}")]
    Service(ServiceError),
    #[error("file {name} processing failed")]
    FileFailed { name: String },
    #[error("file {name} not ready after {waited_secs} seconds")]
    NotReady { name: String, waited_secs: u64 },
    #[error(transparent)]
    Format(#[from] ResponseFormatError),
    #[error("staging temporary file: {0}")]
    Staging(#[from] std::io::Error),
}

impl AttemptError {
    fn kind(&self) -> FailureKind {
        let service = |e: &ServiceError, transient: FailureKind| match e.kind {
            ServiceErrorKind::Quota => FailureKind::Quota,
            ServiceErrorKind::Authentication => FailureKind::Authentication,
            ServiceErrorKind::Transient => transient,
        };
        match self {
            AttemptError::Upload(e) => service(e, FailureKind::Upload),
            AttemptError::Service(e) => service(e, FailureKind::Transient),
            AttemptError::FileFailed { .. } => FailureKind::Upload,
            AttemptError::NotReady { .. } | AttemptError::Staging(_) => FailureKind::Transient,
            AttemptError::Format(_) => FailureKind::Format,
        }
    }
}

/// Findings for one analyzed document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAnalysis {
    /// Exactly one finding per requested rule, in rule order.
    pub findings: Vec<Finding>,
    pub attempts: u32,
    /// Every attempt returned unparseable output; findings are synthetic.
    pub degraded: bool,
}

/// Deletes an uploaded attachment when the attempt ends.
///
/// [`release`](Self::release) deletes inline. If the guard is dropped
/// without being released (the attempt future was cancelled), the delete is
/// spawned on the current runtime instead.
struct UploadGuard {
    client: Arc<dyn ModelClient>,
    file: Option<RemoteFile>,
}

impl UploadGuard {
    async fn release(mut self) {
        if let Some(file) = self.file.take() {
            match self.client.delete(&file.name).await {
                Ok(()) => debug!(file = %file.name, "deleted uploaded file"),
                Err(e) => warn!(file = %file.name, error = %e, "failed to delete uploaded file"),
            }
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let client = self.client.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = client.delete(&file.name).await {
                            warn!(file = %file.name, error = %e, "failed to delete uploaded file");
                        }
                    });
                }
                Err(_) => warn!(file = %file.name, "no runtime available to delete uploaded file"),
            }
        }
    }
}

pub struct ModelAnalyzer {
    client: Arc<dyn ModelClient>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    upload_attempts: u32,
    upload_delay: Duration,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl ModelAnalyzer {
    /// The limiter is shared by every document analyzed with this instance,
    /// and its clock drives all waits.
    pub fn new(client: Arc<dyn ModelClient>, limiter: Arc<RateLimiter>, config: &ModelConfig) -> Self {
        Self {
            client,
            clock: limiter.clock().clone(),
            limiter,
            retry: RetryPolicy::from_config(config),
            upload_attempts: config.upload_retries.max(1),
            upload_delay: Duration::from_secs(config.upload_retry_delay_secs),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            ready_poll: Duration::from_secs(config.ready_poll_secs.max(1)),
        }
    }

    /// Analyze one PDF against `rules`.
    ///
    /// On success the result holds one finding per rule, labelled with the
    /// rule's exact name, even when the model's output could not be parsed.
    pub async fn analyze(
        &self,
        document: &str,
        bytes: &[u8],
        rules: &[Rule],
        progress: &dyn AuditProgressReporter,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        if rules.is_empty() {
            return Ok(DocumentAnalysis {
                findings: Vec::new(),
                attempts: 0,
                degraded: false,
            });
        }

        let prompt = prompt::build_prompt(rules);
        let mut attempt = 0u32;

        loop {
            emit(progress, document, attempt, AttemptState::Pending);
            let err = match self
                .run_attempt(document, bytes, rules, &prompt, attempt, progress)
                .await
            {
                Ok(findings) => {
                    emit(progress, document, attempt, AttemptState::Done);
                    info!(document, attempts = attempt + 1, "analysis complete");
                    return Ok(DocumentAnalysis {
                        findings,
                        attempts: attempt + 1,
                        degraded: false,
                    });
                }
                Err(err) => err,
            };

            let kind = err.kind();
            match self.retry.decide(attempt, kind) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        document,
                        attempt = attempt + 1,
                        kind = ?kind,
                        error = %err,
                        delay_secs = delay.as_secs_f64(),
                        "attempt failed, retrying"
                    );
                    emit(progress, document, attempt, AttemptState::Retrying);
                    progress.report(AuditProgressEvent::Retry {
                        name: document.to_string(),
                        attempt,
                        delay_secs: delay.as_secs_f64(),
                        reason: err.to_string(),
                    });
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Degrade => {
                    warn!(
                        document,
                        attempts = attempt + 1,
                        error = %err,
                        "response unparseable on every attempt, manual review required"
                    );
                    emit(progress, document, attempt, AttemptState::Done);
                    return Ok(DocumentAnalysis {
                        findings: parse::unclear_response_findings(rules),
                        attempts: attempt + 1,
                        degraded: true,
                    });
                }
                RetryDecision::Fail => {
                    emit(progress, document, attempt, AttemptState::Failed);
                    let attempts = attempt + 1;
                    let message = err.to_string();
                    return Err(match kind {
                        FailureKind::Authentication => AnalysisError::Authentication(message),
                        FailureKind::Quota => AnalysisError::QuotaExhausted { attempts, message },
                        _ => AnalysisError::Exhausted { attempts, message },
                    });
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        document: &str,
        bytes: &[u8],
        rules: &[Rule],
        prompt: &str,
        attempt: u32,
        progress: &dyn AuditProgressReporter,
    ) -> Result<Vec<Finding>, AttemptError> {
        let staged = stage(bytes)?;
        let mut guard = UploadGuard {
            client: self.client.clone(),
            file: None,
        };

        let result = self
            .upload_and_generate(document, staged.path(), rules, prompt, attempt, progress, &mut guard)
            .await;

        guard.release().await;
        if let Err(e) = staged.close() {
            warn!(document, error = %e, "failed to remove temporary file");
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_and_generate(
        &self,
        document: &str,
        path: &Path,
        rules: &[Rule],
        prompt: &str,
        attempt: u32,
        progress: &dyn AuditProgressReporter,
        guard: &mut UploadGuard,
    ) -> Result<Vec<Finding>, AttemptError> {
        emit(progress, document, attempt, AttemptState::Uploading);
        let file = self
            .upload(document, path)
            .await
            .map_err(AttemptError::Upload)?;
        guard.file = Some(file.clone());

        emit(progress, document, attempt, AttemptState::WaitingActive);
        self.wait_until_active(document, &file).await?;

        emit(progress, document, attempt, AttemptState::Generating);
        self.limiter.acquire().await;
        let text = self
            .client
            .generate(prompt, &file)
            .await
            .map_err(AttemptError::Service)?;

        emit(progress, document, attempt, AttemptState::Parsing);
        let raw = parse::parse_response(&text)?;
        Ok(parse::reconcile(document, rules, raw))
    }

    async fn upload(&self, document: &str, path: &Path) -> Result<RemoteFile, ServiceError> {
        let mut last = None;
        for n in 0..self.upload_attempts {
            if n > 0 {
                self.clock.sleep(self.upload_delay).await;
            }
            self.limiter.acquire().await;
            match self.client.upload(path, MIME_PDF, document).await {
                Ok(file) => {
                    debug!(document, file = %file.name, "uploaded");
                    return Ok(file);
                }
                Err(e) if e.kind == ServiceErrorKind::Authentication => return Err(e),
                Err(e) => {
                    debug!(document, upload_attempt = n + 1, error = %e, "upload failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| ServiceError::transient("upload was not attempted")))
    }

    async fn wait_until_active(&self, document: &str, file: &RemoteFile) -> Result<(), AttemptError> {
        let started = self.clock.now();
        while self.clock.now().saturating_duration_since(started) < self.ready_timeout {
            self.clock.sleep(self.ready_poll).await;
            match self.client.file_state(&file.name).await {
                Ok(FileState::Active) => return Ok(()),
                Ok(FileState::Failed) => {
                    return Err(AttemptError::FileFailed {
                        name: file.name.clone(),
                    })
                }
                Ok(state) => debug!(document, file = %file.name, ?state, "waiting for file"),
                Err(e) if e.kind == ServiceErrorKind::Authentication => {
                    return Err(AttemptError::Service(e))
                }
                Err(e) => debug!(document, file = %file.name, error = %e, "status poll failed"),
            }
        }

        match self.client.file_state(&file.name).await {
            Ok(FileState::Active) => Ok(()),
            Ok(_) => Err(AttemptError::NotReady {
                name: file.name.clone(),
                waited_secs: self.ready_timeout.as_secs(),
            }),
            Err(e) => Err(AttemptError::Service(e)),
        }
    }
}

fn emit(progress: &dyn AuditProgressReporter, document: &str, attempt: u32, state: AttemptState) {
    progress.report(AuditProgressEvent::Attempt {
        name: document.to_string(),
        attempt,
        state,
    });
}

/// Write `bytes` to a `.pdf` temporary file removed when dropped or closed.
fn stage(bytes: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("ccheck-")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
