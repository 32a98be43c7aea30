//! SurrealDB schema initialization
//!
//! Safe to call on every connection (idempotent).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all pitwall tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing pitwall SurrealDB schema");
    init_extracted_records_table(db).await?;
    info!("pitwall schema initialization complete");
    Ok(())
}

/// Initialize `extracted_records` table
///
/// Schema:
/// ```text
/// TABLE extracted_records {
///   id:           [image_id, datatype] (record id, idempotency key)
///   image_id:     STRING (indexed)
///   datatype:     STRING
///   data:         ANY (validated model output)
///   captured_at:  STRING (RFC 3339, indexed)
/// }
/// ```
///
/// Records are written with `UPSERT` on the composite id, so a retried write
/// replaces the row instead of duplicating it.
async fn init_extracted_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing extracted_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS extracted_records SCHEMALESS;

        -- Lookup of every datatype captured for one image
        DEFINE INDEX IF NOT EXISTS idx_record_image ON TABLE extracted_records COLUMNS image_id;

        -- Unique (image, datatype) pair
        DEFINE INDEX IF NOT EXISTS idx_record_key ON TABLE extracted_records COLUMNS image_id, datatype UNIQUE;

        -- Recency listing for the presentation layer
        DEFINE INDEX IF NOT EXISTS idx_record_captured_at ON TABLE extracted_records COLUMNS captured_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    debug!("extracted_records table initialized");
    Ok(())
}
