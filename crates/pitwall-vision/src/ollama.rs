//! Ollama HTTP client
//!
//! `POST {host}/api/generate` with the frame as a base64 image, JSON output
//! mode and streaming disabled. The reply envelope carries the model text in
//! its `response` field.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::InferenceError;
use crate::{InferenceClient, Result};

/// Default Ollama instance on the local machine.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [String; 1],
    format: &'static str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama client for vision-model inference.
pub struct OllamaClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a client for `base_url` with a per-request deadline.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pitwall-vision/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            timeout_secs,
        }
    }

    /// Default local instance with a 90-second deadline.
    pub fn default_local() -> Self {
        Self::new(DEFAULT_OLLAMA_HOST, 90)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout {
                secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            InferenceError::Unavailable(format!("cannot connect to {}: {}", self.base_url, err))
        } else {
            InferenceError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    #[instrument(skip(self, image, prompt), fields(host = %self.base_url, image_bytes = image.len()))]
    async fn infer(&self, image: &[u8], prompt: &str, model: &str) -> Result<String> {
        assert!(!image.is_empty(), "inference requires a non-empty image");
        assert!(!prompt.is_empty(), "inference requires a non-empty prompt");

        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            images: [base64::engine::general_purpose::STANDARD.encode(image)],
            format: "json",
            stream: false,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "inference backend returned error status");
            return Err(InferenceError::Unavailable(format!(
                "status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let envelope: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(e)
            } else {
                InferenceError::Unavailable(format!("unexpected response envelope: {e}"))
            }
        })?;

        debug!(chars = envelope.response.len(), "inference response received");
        Ok(envelope.response)
    }
}
