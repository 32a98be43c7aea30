//! Global atomic counters.
//!
//! Counters are incremented silently at the call site. [`Metrics::flush`]
//! emits the current values as a single `info!` event (worker shutdown,
//! `pitwall status`).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    images_processed: AtomicU64,
    images_failed: AtomicU64,
    extractions_succeeded: AtomicU64,
    extractions_failed: AtomicU64,
    inference_retries: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub images_processed: u64,
    pub images_failed: u64,
    pub extractions_succeeded: u64,
    pub extractions_failed: u64,
    pub inference_retries: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            images_processed: AtomicU64::new(0),
            images_failed: AtomicU64::new(0),
            extractions_succeeded: AtomicU64::new(0),
            extractions_failed: AtomicU64::new(0),
            inference_retries: AtomicU64::new(0),
        }
    }

    pub fn inc_images_processed(&self) {
        self.images_processed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "images_processed", "counter incremented");
    }

    pub fn inc_images_failed(&self) {
        self.images_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "images_failed", "counter incremented");
    }

    pub fn inc_extractions_succeeded(&self) {
        self.extractions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extractions_succeeded", "counter incremented");
    }

    pub fn inc_extractions_failed(&self) {
        self.extractions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extractions_failed", "counter incremented");
    }

    pub fn inc_inference_retries(&self) {
        self.inference_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "inference_retries", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            images_processed: self.images_processed.load(Ordering::Relaxed),
            images_failed: self.images_failed.load(Ordering::Relaxed),
            extractions_succeeded: self.extractions_succeeded.load(Ordering::Relaxed),
            extractions_failed: self.extractions_failed.load(Ordering::Relaxed),
            inference_retries: self.inference_retries.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            images_processed = s.images_processed,
            images_failed = s.images_failed,
            extractions_succeeded = s.extractions_succeeded,
            extractions_failed = s.extractions_failed,
            inference_retries = s.inference_retries,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.images_processed.store(0, Ordering::Relaxed);
        self.images_failed.store(0, Ordering::Relaxed);
        self.extractions_succeeded.store(0, Ordering::Relaxed);
        self.extractions_failed.store(0, Ordering::Relaxed);
        self.inference_retries.store(0, Ordering::Relaxed);
    }
}
