//! Record types and the backend-agnostic store interface.
//!
//! Every backend implements [`RecordStore`] with the same guarantees:
//! - `persist` is idempotent on `(image_id, datatype)`: a second write for the
//!   same key replaces the first, never adds a row.
//! - Failures surface as [`StorageError`], whichever backend is active.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Which database the process is writing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Remote SurrealDB configured with connection parameters
    Primary,
    /// Local file-backed SurrealDB
    Fallback,
    /// Process-local in-memory store (tests)
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Primary => "primary",
            BackendKind::Fallback => "fallback",
            BackendKind::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// One validated extraction, written once per `(image, datatype)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDataRecord {
    /// Source image filename
    pub image_id: String,
    /// Datatype name (e.g. "current_lap")
    pub datatype: String,
    /// Parsed, shape-checked value returned by the model
    pub value: serde_json::Value,
    /// When the value was extracted
    pub captured_at: DateTime<Utc>,
}

impl ExtractedDataRecord {
    pub fn new(
        image_id: impl Into<String>,
        datatype: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            datatype: datatype.into(),
            value,
            captured_at: Utc::now(),
        }
    }

    /// Idempotency key.
    pub fn key(&self) -> (&str, &str) {
        (&self.image_id, &self.datatype)
    }
}

/// Persistence interface shared by the primary and fallback backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record keyed on `(image_id, datatype)`.
    async fn persist(&self, record: &ExtractedDataRecord) -> StorageResult<()>;

    /// Fetch a single record by key.
    async fn get(&self, image_id: &str, datatype: &str)
        -> StorageResult<Option<ExtractedDataRecord>>;

    /// All records for one image, ordered by datatype name.
    async fn list_for_image(&self, image_id: &str) -> StorageResult<Vec<ExtractedDataRecord>>;

    /// Most recently captured records first.
    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<ExtractedDataRecord>>;

    /// Total number of stored records.
    async fn count(&self) -> StorageResult<u64>;
}
