//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRecordStore` satisfies the [`RecordStore`] contract without any
//! external dependencies and can be switched into an unavailable state to
//! exercise storage-failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{ExtractedDataRecord, RecordStore, StorageResult};

/// In-memory store backed by a `BTreeMap<(image_id, datatype), record>`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<(String, String), ExtractedDataRecord>>,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `persist` calls, including overwrites.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn persist(&self, record: &ExtractedDataRecord) -> StorageResult<()> {
        self.check_available()?;
        let (image_id, datatype) = record.key();
        let mut records = self.records.lock().unwrap();
        records.insert((image_id.to_string(), datatype.to_string()), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        image_id: &str,
        datatype: &str,
    ) -> StorageResult<Option<ExtractedDataRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&(image_id.to_string(), datatype.to_string()))
            .cloned())
    }

    async fn list_for_image(&self, image_id: &str) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| r.image_id == image_id)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<ExtractedDataRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap();
        let mut all: Vec<ExtractedDataRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn count(&self) -> StorageResult<u64> {
        self.check_available()?;
        Ok(self.records.lock().unwrap().len() as u64)
    }
}
