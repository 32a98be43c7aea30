//! SurrealDB-backed RecordStore implementation
//!
//! One implementation serves both backends: the primary connects over
//! WebSocket to a remote server, the fallback opens a local `surrealkv://`
//! directory. `mem://` is used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::config::PrimaryConfig;
use crate::error::StateError;
use crate::migrations;
use crate::record::{BackendKind, ExtractedDataRecord, RecordStore, StorageResult};

const RECORD_COLUMNS: &str = "image_id, datatype, data, captured_at";

/// Row layout in the `extracted_records` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRecord {
    image_id: String,
    datatype: String,
    data: serde_json::Value,
    captured_at: DateTime<Utc>,
}

impl From<&ExtractedDataRecord> for DbRecord {
    fn from(record: &ExtractedDataRecord) -> Self {
        Self {
            image_id: record.image_id.clone(),
            datatype: record.datatype.clone(),
            data: record.value.clone(),
            captured_at: record.captured_at,
        }
    }
}

impl From<DbRecord> for ExtractedDataRecord {
    fn from(row: DbRecord) -> Self {
        Self {
            image_id: row.image_id,
            datatype: row.datatype,
            value: row.data,
            captured_at: row.captured_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

/// SurrealDB-backed implementation of [`RecordStore`].
#[derive(Clone)]
pub struct SurrealRecordStore {
    db: Surreal<Any>,
    kind: BackendKind,
}

impl SurrealRecordStore {
    /// Connect to the primary (remote) database and set up schema.
    #[instrument(skip(config), fields(endpoint = %config.endpoint(), namespace = %config.namespace, database = %config.database))]
    pub async fn connect_primary(config: &PrimaryConfig) -> crate::Result<Self> {
        let endpoint = config.endpoint();
        info!("Connecting to primary SurrealDB (root={})", config.root);

        let db = surrealdb::engine::any::connect(&endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", endpoint, e))
            })?;

        if config.root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StateError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        migrations::init_schema(&db).await?;
        info!("Primary SurrealDB connected and schema initialized");
        Ok(Self {
            db,
            kind: BackendKind::Primary,
        })
    }

    /// Open the local file-backed fallback database, creating its directory.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open_fallback(path: &Path) -> crate::Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", path.display());
        info!("Using local fallback database: {}", url);

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        Self::select_default_ns(db, BackendKind::Fallback).await
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Self::select_default_ns(db, BackendKind::Memory).await
    }

    async fn select_default_ns(db: Surreal<Any>, kind: BackendKind) -> crate::Result<Self> {
        db.use_ns("pitwall")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        debug!(backend = %kind, "SurrealRecordStore ready");
        Ok(Self { db, kind })
    }

    /// Which backend this store talks to.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn select_rows(
        &self,
        sql: String,
        bindings: Vec<(&'static str, serde_json::Value)>,
    ) -> StorageResult<Vec<ExtractedDataRecord>> {
        let mut query = self.db.query(sql);
        for binding in bindings {
            query = query.bind(binding);
        }
        let mut res = query.await?;
        let rows: Vec<DbRecord> = res.take(0)?;
        Ok(rows.into_iter().map(ExtractedDataRecord::from).collect())
    }
}

#[async_trait]
impl RecordStore for SurrealRecordStore {
    #[instrument(skip(self, record), fields(image_id = %record.image_id, datatype = %record.datatype, backend = %self.kind))]
    async fn persist(&self, record: &ExtractedDataRecord) -> StorageResult<()> {
        let row = DbRecord::from(record);
        let image_id = row.image_id.clone();
        let datatype = row.datatype.clone();

        let mut res = self
            .db
            .query(
                "UPSERT type::thing('extracted_records', [$image_id, $datatype]) CONTENT $row",
            )
            .bind(("image_id", image_id))
            .bind(("datatype", datatype))
            .bind(("row", row))
            .await?;

        let _written: Vec<DbRecord> = res.take(0)?;
        debug!("record persisted");
        Ok(())
    }

    async fn get(
        &self,
        image_id: &str,
        datatype: &str,
    ) -> StorageResult<Option<ExtractedDataRecord>> {
        let rows = self
            .select_rows(
                format!(
                    "SELECT {RECORD_COLUMNS} FROM extracted_records \
                     WHERE image_id = $image_id AND datatype = $datatype"
                ),
                vec![
                    ("image_id", serde_json::Value::from(image_id)),
                    ("datatype", serde_json::Value::from(datatype)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_for_image(&self, image_id: &str) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.select_rows(
            format!(
                "SELECT {RECORD_COLUMNS} FROM extracted_records \
                 WHERE image_id = $image_id ORDER BY datatype ASC"
            ),
            vec![("image_id", serde_json::Value::from(image_id))],
        )
        .await
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.select_rows(
            format!(
                "SELECT {RECORD_COLUMNS} FROM extracted_records \
                 ORDER BY captured_at DESC LIMIT $limit"
            ),
            vec![("limit", serde_json::Value::from(limit as u64))],
        )
        .await
    }

    async fn count(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() FROM extracted_records GROUP ALL")
            .await?;
        let row: Option<CountRow> = res.take(0)?;
        Ok(row.map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn persist_then_get() {
        let store = SurrealRecordStore::in_memory().await.unwrap();
        let record = ExtractedDataRecord::new("frame_001.jpg", "current_lap", json!({"lap_number": 42}));
        store.persist(&record).await.unwrap();

        let got = store.get("frame_001.jpg", "current_lap").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"lap_number": 42}));
        assert_eq!(store.kind(), BackendKind::Memory);
    }

    #[tokio::test]
    async fn repeated_persist_overwrites() {
        let store = SurrealRecordStore::in_memory().await.unwrap();
        let first = ExtractedDataRecord::new("f.jpg", "current_lap", json!({"lap_number": 1}));
        let second = ExtractedDataRecord::new("f.jpg", "current_lap", json!({"lap_number": 2}));
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.get("f.jpg", "current_lap").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"lap_number": 2}));
    }

    #[tokio::test]
    async fn count_on_empty_table_is_zero() {
        let store = SurrealRecordStore::in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fallback_opens_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let store = SurrealRecordStore::open_fallback(&path).await.unwrap();
        assert_eq!(store.kind(), BackendKind::Fallback);
        assert!(path.exists());

        let record = ExtractedDataRecord::new("a.png", "tire_info", json!({"tire_info": []}));
        store.persist(&record).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
