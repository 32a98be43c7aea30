//! Pitwall-State: SurrealDB persistence for extraction records
//!
//! This crate owns every write of an extracted data record. It hides which
//! database is active behind [`RecordStore`] and the [`StorageRouter`].
//!
//! ## Backend selection
//!
//! Resolved once at startup from [`DatabaseConfig`]:
//! - primary connection parameters present: remote SurrealDB over WebSocket
//! - otherwise: local file-backed SurrealDB (`surrealkv://`) at the fallback path
//!
//! ## Key Components
//!
//! - `StorageRouter`: bounded, timed writes into the active backend
//! - `SurrealRecordStore`: SurrealDB implementation of `RecordStore`
//! - `fakes::MemoryRecordStore`: in-memory implementation for tests

mod config;
mod error;
pub mod fakes;
mod migrations;
pub mod record;
mod router;
pub mod surreal_store;

pub use config::{BackendSelection, DatabaseConfig, PrimaryConfig};
pub use error::{StateError, StorageError};
pub use record::{BackendKind, ExtractedDataRecord, RecordStore, StorageResult};
pub use router::StorageRouter;
pub use surreal_store::SurrealRecordStore;

/// Result type for connection and setup operations
pub type Result<T> = std::result::Result<T, StateError>;
