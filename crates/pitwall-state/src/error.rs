//! Error types for pitwall-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Connection(err.to_string())
    }
}

/// Errors from record persistence.
///
/// Both backends report failures through this one type so callers never
/// branch on which database is active.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend rejected the operation or could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the write deadline.
    #[error("storage write timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A record could not be encoded or decoded.
    #[error("record serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_deadline() {
        let err = StorageError::Timeout { secs: 10 };
        assert_eq!(err.to_string(), "storage write timed out after 10s");
    }

    #[test]
    fn serde_error_maps_to_serialization() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StorageError = bad.into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
