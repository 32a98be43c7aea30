//! Storage Router - the single write path into the active backend.
//!
//! The router resolves [`BackendSelection`] once when it is built and keeps
//! the chosen store for the life of the process. Writes share one connection,
//! so concurrency is bounded by a semaphore and every write carries a
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::config::{BackendSelection, DatabaseConfig};
use crate::error::StorageError;
use crate::record::{BackendKind, ExtractedDataRecord, RecordStore, StorageResult};
use crate::surreal_store::SurrealRecordStore;

/// Routes persistence calls to whichever backend was selected at startup.
#[derive(Clone)]
pub struct StorageRouter {
    store: Arc<dyn RecordStore>,
    active: BackendKind,
    permits: Arc<Semaphore>,
    write_timeout: Duration,
}

impl std::fmt::Debug for StorageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRouter")
            .field("active", &self.active)
            .field("available_permits", &self.permits.available_permits())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl StorageRouter {
    /// Resolve the backend from configuration and connect to it.
    ///
    /// A configured primary that cannot be reached is a startup error; the
    /// router never silently falls back.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> crate::Result<Self> {
        let (store, active) = match BackendSelection::resolve(config) {
            BackendSelection::Primary(primary) => {
                info!("Primary database configured, connecting");
                let store = SurrealRecordStore::connect_primary(&primary).await?;
                (store, BackendKind::Primary)
            }
            BackendSelection::Fallback(path) => {
                info!("No primary database configured, using fallback");
                let store = SurrealRecordStore::open_fallback(&path).await?;
                (store, BackendKind::Fallback)
            }
        };

        Ok(Self::with_store(
            Arc::new(store),
            active,
            config.max_concurrent_writes,
            Duration::from_secs(config.write_timeout_secs),
        ))
    }

    /// Wrap an already-built store (tests, embedding).
    pub fn with_store(
        store: Arc<dyn RecordStore>,
        active: BackendKind,
        max_concurrent_writes: usize,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            active,
            permits: Arc::new(Semaphore::new(max_concurrent_writes.max(1))),
            write_timeout,
        }
    }

    /// Backend in use for this process.
    pub fn active(&self) -> BackendKind {
        self.active
    }

    /// Persist a record, bounded by the write deadline.
    #[instrument(skip(self, record), fields(image_id = %record.image_id, datatype = %record.datatype, backend = %self.active))]
    pub async fn persist(&self, record: &ExtractedDataRecord) -> StorageResult<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StorageError::Unavailable("storage router closed".to_string()))?;

        match tokio::time::timeout(self.write_timeout, self.store.persist(record)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!("storage write exceeded deadline");
                Err(StorageError::Timeout {
                    secs: self.write_timeout.as_secs(),
                })
            }
        }
    }

    pub async fn get(
        &self,
        image_id: &str,
        datatype: &str,
    ) -> StorageResult<Option<ExtractedDataRecord>> {
        self.store.get(image_id, datatype).await
    }

    pub async fn list_for_image(&self, image_id: &str) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.store.list_for_image(image_id).await
    }

    pub async fn list_recent(&self, limit: usize) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.store.list_recent(limit).await
    }

    pub async fn count(&self) -> StorageResult<u64> {
        self.store.count().await
    }
}
