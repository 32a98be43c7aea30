//! Failure Log
//!
//! Append-only record of every failed (image, datatype) attempt. The file
//! sink writes one JSON object per line and syncs before returning, so an
//! entry is durable before the image is moved.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::{ErrorCode, ImageId};

/// One failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLogEntry {
    pub image_id: String,
    /// `None` for image-level failures (unreadable file, lifecycle move).
    pub datatype: Option<String>,
    pub code: ErrorCode,
    pub message: String,
    /// Model output, when the backend answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailureLogEntry {
    pub fn new(
        image_id: &ImageId,
        datatype: Option<&str>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            image_id: image_id.to_string(),
            datatype: datatype.map(str::to_string),
            code,
            message: message.into(),
            raw_response: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_raw_response(mut self, raw: Option<String>) -> Self {
        self.raw_response = raw;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FailureLogError {
    #[error("failure log I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failure log encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type FailureLogResult<T> = std::result::Result<T, FailureLogError>;

/// Durable append-only sink for failure entries.
#[async_trait]
pub trait FailureLog: Send + Sync {
    /// Append one entry; returns once it is durable.
    async fn append(&self, entry: &FailureLogEntry) -> FailureLogResult<()>;

    /// All readable entries, oldest first.
    async fn entries(&self) -> FailureLogResult<Vec<FailureLogEntry>>;
}

/// JSON Lines file sink.
#[derive(Debug)]
pub struct JsonlFailureLog {
    path: PathBuf,
    // Serializes appends so concurrent lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create the parent directory of the log file.
    pub async fn ensure_parent(&self) -> FailureLogResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(parent, e))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> FailureLogError {
        FailureLogError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl FailureLog for JsonlFailureLog {
    async fn append(&self, entry: &FailureLogEntry) -> FailureLogResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(&self.path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| self.io_err(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| self.io_err(&self.path, e))?;
        Ok(())
    }

    async fn entries(&self) -> FailureLogResult<Vec<FailureLogEntry>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(&self.path, e)),
        };

        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // A crash mid-append can leave a torn last line.
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping unreadable failure log line"),
            }
        }
        Ok(entries)
    }
}
