//! In-memory failure log for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ErrorCode;
use crate::failure_log::{FailureLog, FailureLogEntry, FailureLogError, FailureLogResult};

#[derive(Debug, Default)]
pub struct MemoryFailureLog {
    entries: Mutex<Vec<FailureLogEntry>>,
    broken: AtomicBool,
}

impl MemoryFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<FailureLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn for_image(&self, image_id: &str) -> Vec<FailureLogEntry> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.image_id == image_id)
            .collect()
    }

    pub fn count_code(&self, code: ErrorCode) -> usize {
        self.snapshot().iter().filter(|e| e.code == code).count()
    }
}

#[async_trait]
impl FailureLog for MemoryFailureLog {
    async fn append(&self, entry: &FailureLogEntry) -> FailureLogResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(FailureLogError::Io {
                path: "<memory>".into(),
                source: std::io::Error::other("failure log unavailable"),
            });
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> FailureLogResult<Vec<FailureLogEntry>> {
        Ok(self.snapshot())
    }
}
