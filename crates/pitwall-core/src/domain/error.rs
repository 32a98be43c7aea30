//! Error taxonomy for the extraction pipeline.

use serde::{Deserialize, Serialize};

/// Failure codes written to the failure log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Inference backend unreachable after all retries
    LlmUnavailable,
    /// Inference backend missed its deadline
    LlmTimeout,
    /// Model output malformed or of the wrong shape
    ValidationFailed,
    /// Persistence backend rejected or missed the write
    StorageUnavailable,
    /// Image was moved by another actor
    FileMissing,
    /// Filesystem I/O fault
    FilesystemError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::FileMissing => "FILE_MISSING",
            ErrorCode::FilesystemError => "FILESYSTEM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the file lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("image not found in expected location: {0}")]
    FileMissing(String),

    #[error("filesystem error on {path}: {reason}")]
    FileSystem { path: String, reason: String },

    #[error("invalid image name: {0:?}")]
    InvalidName(String),
}

impl LifecycleError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        LifecycleError::FileSystem {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            LifecycleError::FileMissing(_) => ErrorCode::FileMissing,
            LifecycleError::FileSystem { .. } | LifecycleError::InvalidName(_) => {
                ErrorCode::FilesystemError
            }
        }
    }
}

/// Errors surfaced by the manual "process this image now" entry point.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot take image for processing: {0}")]
    Lifecycle(#[from] LifecycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_wire_strings() {
        let json = serde_json::to_string(&ErrorCode::LlmUnavailable).unwrap();
        assert_eq!(json, "\"LLM_UNAVAILABLE\"");
        for code in [
            ErrorCode::LlmUnavailable,
            ErrorCode::LlmTimeout,
            ErrorCode::ValidationFailed,
            ErrorCode::StorageUnavailable,
            ErrorCode::FileMissing,
            ErrorCode::FilesystemError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn lifecycle_errors_map_to_codes() {
        assert_eq!(
            LifecycleError::FileMissing("a.jpg".into()).code(),
            ErrorCode::FileMissing
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            LifecycleError::io(std::path::Path::new("/x"), io).code(),
            ErrorCode::FilesystemError
        );
    }
}
