//! Extraction tasks and classified results.

use pitwall_vision::InferenceError;
use serde::{Deserialize, Serialize};

use super::datatype::Datatype;
use super::error::ErrorCode;
use super::image::ImageId;

/// One (image, datatype, prompt) unit of work. Built per image, never stored.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionTask<'a> {
    pub image_id: &'a ImageId,
    pub datatype: &'a Datatype,
    pub prompt: &'a str,
}

/// Classification of one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    ValidationFailed,
    BackendUnavailable,
    BackendTimeout,
}

impl Outcome {
    /// Failure-log code for a non-success outcome.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Success => None,
            Outcome::ValidationFailed => Some(ErrorCode::ValidationFailed),
            Outcome::BackendUnavailable => Some(ErrorCode::LlmUnavailable),
            Outcome::BackendTimeout => Some(ErrorCode::LlmTimeout),
        }
    }
}

/// Result of running one datatype's response through validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub datatype: Datatype,
    /// Model text, when the backend answered at all.
    pub raw_text: Option<String>,
    /// Shape-checked value; present only on success.
    pub parsed: Option<serde_json::Value>,
    pub outcome: Outcome,
    /// Why the outcome is not `Success`.
    pub reason: Option<String>,
}

impl ExtractionResult {
    pub fn success(datatype: Datatype, raw_text: &str, parsed: serde_json::Value) -> Self {
        Self {
            datatype,
            raw_text: Some(raw_text.to_string()),
            parsed: Some(parsed),
            outcome: Outcome::Success,
            reason: None,
        }
    }

    pub fn validation_failed(datatype: Datatype, raw_text: &str, reason: impl Into<String>) -> Self {
        Self {
            datatype,
            raw_text: Some(raw_text.to_string()),
            parsed: None,
            outcome: Outcome::ValidationFailed,
            reason: Some(reason.into()),
        }
    }

    /// Classify a transport failure.
    pub fn from_inference_error(datatype: Datatype, err: &InferenceError) -> Self {
        let outcome = match err {
            InferenceError::Unavailable(_) => Outcome::BackendUnavailable,
            InferenceError::Timeout { .. } => Outcome::BackendTimeout,
        };
        Self {
            datatype,
            raw_text: None,
            parsed: None,
            outcome,
            reason: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
