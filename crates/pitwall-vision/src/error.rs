//! Error types for pitwall-vision

use thiserror::Error;

/// Transport-level inference failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Connection refused, DNS failure, non-success status or an unusable
    /// reply envelope. Retryable.
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    /// No response within the configured deadline. Not retried.
    #[error("inference backend timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl InferenceError {
    /// Whether a caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(InferenceError::Unavailable("refused".into()).is_retryable());
        assert!(!InferenceError::Timeout { secs: 90 }.is_retryable());
    }
}
