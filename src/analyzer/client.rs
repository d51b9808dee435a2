//! The hosted model service boundary.
//!
//! [`ModelClient`] covers the two call types the analyzer needs: managing a
//! binary attachment (upload, poll, delete) and generating text from a
//! prompt plus that attachment. [`GeminiClient`](super::gemini::GeminiClient)
//! is the production implementation; tests script their own.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// An uploaded attachment as known to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Service resource name, e.g. `files/abc123`.
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// Processing state of an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
    Other(String),
}

impl FileState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ACTIVE" => FileState::Active,
            "PROCESSING" | "STATE_UNSPECIFIED" => FileState::Processing,
            "FAILED" => FileState::Failed,
            other => FileState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Rate limit or quota exceeded; retried with exponential backoff.
    Quota,
    /// Bad or missing credentials; never retried.
    Authentication,
    /// Anything else; retried after a fixed delay.
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn quota(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Quota,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Authentication,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Classify an error by its text.
    ///
    /// Quota signatures win over authentication ones, so a message naming
    /// both is retried rather than aborting the batch.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        let quota = message.contains("429")
            || lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("resource exhausted")
            || lower.contains("resource_exhausted");
        if quota {
            return Self::quota(message);
        }

        let auth = [
            "api key",
            "api_key_invalid",
            "invalid key",
            "invalid credentials",
            "unauthenticated",
            "permission_denied",
            "authentication",
        ]
        .iter()
        .any(|sig| lower.contains(sig));
        if auth {
            return Self::authentication(message);
        }

        Self::transient(message)
    }

    /// Classify a non-success HTTP response.
    ///
    /// A `400 INVALID_ARGUMENT` rejects one request (payload too large,
    /// unsupported attachment) and stays transient unless it names a key.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        match status {
            429 => Self::quota(message),
            401 | 403 => Self::authentication(message),
            _ => Self::classify(message),
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Upload the file at `path` as an attachment.
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, ServiceError>;

    async fn file_state(&self, name: &str) -> Result<FileState, ServiceError>;

    async fn delete(&self, name: &str) -> Result<(), ServiceError>;

    /// Generate a text response for `prompt` over the attachment.
    async fn generate(&self, prompt: &str, file: &RemoteFile) -> Result<String, ServiceError>;
}
