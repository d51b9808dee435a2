//! [`ModelClient`] for the Gemini REST API.
//!
//! - Upload: `POST {base}/upload/v1beta/files?uploadType=media` with the raw
//!   file bytes.
//! - Status: `GET {base}/v1beta/{name}`.
//! - Delete: `DELETE {base}/v1beta/{name}`.
//! - Generate: `POST {base}/v1beta/models/{model}:generateContent` with the
//!   prompt text and a `file_data` part referencing the upload.
//!
//! The API key is sent in the `x-goog-api-key` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::client::{FileState, ModelClient, RemoteFile, ServiceError};
use crate::config::ModelConfig;

pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    generation_config: Value,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Build a client from config, reading the key from `config.api_key_env`.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!(
                "{} environment variable not set (required for model audits)",
                config.api_key_env
            )
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ModelConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            generation_config: json!({
                "temperature": config.temperature,
                "topP": config.top_p,
                "topK": config.top_k,
                "maxOutputTokens": config.max_output_tokens,
            }),
            client,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ServiceError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::transient(format!("reading response: {}", e)))?;
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ServiceError::transient(format!("invalid service response: {}", e)))
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, ServiceError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ServiceError::transient(format!("file upload: reading {}: {}", path.display(), e))
        })?;
        tracing::debug!(file = display_name, bytes = bytes.len(), "uploading");

        let url = format!("{}/upload/v1beta/files?uploadType=media", self.base_url);
        let json = self
            .send(
                self.client
                    .post(url)
                    .header("Content-Type", mime_type)
                    .body(bytes),
            )
            .await?;
        parse_file(json.get("file").unwrap_or(&json))
            .ok_or_else(|| ServiceError::transient("file upload: response missing file name"))
    }

    async fn file_state(&self, name: &str) -> Result<FileState, ServiceError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let json = self.send(self.client.get(url)).await?;
        Ok(FileState::parse(
            json.get("state").and_then(|s| s.as_str()).unwrap_or("PROCESSING"),
        ))
    }

    async fn delete(&self, name: &str) -> Result<(), ServiceError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        self.send(self.client.delete(url)).await.map(|_| ())
    }

    async fn generate(&self, prompt: &str, file: &RemoteFile) -> Result<String, ServiceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "file_data": { "mime_type": file.mime_type, "file_uri": file.uri } }
                ]
            }],
            "generationConfig": self.generation_config,
        });
        let json = self.send(self.client.post(url).json(&body)).await?;
        response_text(&json).ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            ServiceError::transient(format!("model returned no text ({})", reason))
        })
    }
}

fn parse_file(value: &Value) -> Option<RemoteFile> {
    let name = value.get("name")?.as_str()?.to_string();
    let uri = value
        .get("uri")
        .and_then(|u| u.as_str())
        .unwrap_or_default()
        .to_string();
    let mime_type = value
        .get("mimeType")
        .and_then(|m| m.as_str())
        .unwrap_or(crate::extract::MIME_PDF)
        .to_string();
    Some(RemoteFile {
        name,
        uri,
        mime_type,
    })
}

/// Concatenated text parts of the first candidate.
fn response_text(json: &Value) -> Option<String> {
    let parts = json.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
