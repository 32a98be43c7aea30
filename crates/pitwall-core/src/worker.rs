//! Background worker: polls the pending directory and feeds the pipeline.
//!
//! `workers` tasks share one [`Pipeline`]. Each pass lists pending images and
//! claims them one at a time; a claim is a rename, so tasks (or separate
//! processes) never process the same image. When the inference backend is
//! unreachable for several consecutive images the worker stops claiming for a
//! while but keeps polling and reporting the backlog.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::domain::{ImageState, LifecycleError};
use crate::metrics::METRICS;
use crate::obs;
use crate::pipeline::{ImageReport, Pipeline};
use crate::retry::CircuitBreaker;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Delay between discovery passes (milliseconds)
    pub poll_interval_ms: u64,
    /// Concurrent processing tasks (>= 1)
    pub workers: usize,
    /// Consecutive all-unavailable images before claiming pauses (0 disables)
    pub pause_after_unavailable: u32,
    /// How long claiming stays paused
    pub pause_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            workers: 1,
            pause_after_unavailable: 3,
            pause_secs: 30,
        }
    }
}

/// Create a linked shutdown trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Requests shutdown. Cloneable; triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes shutdown. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires (manual one-shot processing).
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered; pends forever if it never can be.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Totals for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: u64,
    pub failed: u64,
    /// Images returned to pending by shutdown
    pub released: u64,
    /// Images whose final move failed
    pub stuck: u64,
}

impl WorkerSummary {
    fn record(&mut self, report: &ImageReport) {
        match report.final_state {
            Some(ImageState::Processed) => self.processed += 1,
            Some(ImageState::Failed) => self.failed += 1,
            Some(ImageState::Pending) => self.released += 1,
            None => self.stuck += 1,
        }
    }

    fn merge(&mut self, other: WorkerSummary) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.released += other.released;
        self.stuck += other.stuck;
    }
}

/// Polling worker pool over one shared pipeline.
#[derive(Debug, Clone)]
pub struct Worker {
    pipeline: Arc<Pipeline>,
    config: WorkerConfig,
    breaker: Arc<CircuitBreaker>,
}

impl Worker {
    pub fn new(pipeline: Arc<Pipeline>, config: WorkerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.pause_after_unavailable,
            Duration::from_secs(config.pause_secs),
        ));
        Self {
            pipeline,
            config,
            breaker,
        }
    }

    /// Whether claiming is currently paused by the unavailable-backend breaker.
    pub fn is_paused(&self) -> bool {
        self.breaker.is_open()
    }

    /// Run until `shutdown` fires and every task has finished its image.
    pub async fn run(&self, shutdown: ShutdownSignal) -> WorkerSummary {
        let workers = self.config.workers.max(1);
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            workers,
            poll_interval_ms = self.config.poll_interval_ms,
            pending_dir = %self.pipeline.lifecycle().pending_dir().display(),
            "worker started"
        );

        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                let span = tracing::info_span!("pitwall.worker", %run_id, worker = index);
                tokio::spawn(
                    async move { worker.run_loop(index, shutdown).await }.instrument(span),
                )
            })
            .collect();

        let mut summary = WorkerSummary::default();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(part) => summary.merge(part),
                Err(e) => warn!(error = %e, "worker task ended abnormally"),
            }
        }

        METRICS.flush();
        info!(
            %run_id,
            processed = summary.processed,
            failed = summary.failed,
            released = summary.released,
            "worker stopped"
        );
        summary
    }

    async fn run_loop(&self, index: usize, shutdown: ShutdownSignal) -> WorkerSummary {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut summary = WorkerSummary::default();
        while !shutdown.is_triggered() {
            for report in self.poll_once(index, &shutdown).await {
                summary.record(&report);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => break,
            }
        }
        debug!(worker = index, "worker task exiting");
        summary
    }

    /// One discovery pass: claim and process pending images until none are
    /// left, shutdown is requested, or claiming is paused.
    pub async fn poll_once(&self, index: usize, shutdown: &ShutdownSignal) -> Vec<ImageReport> {
        let lifecycle = self.pipeline.lifecycle();
        let pending = match lifecycle.acquire_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(worker = index, error = %e, "pending discovery failed");
                return Vec::new();
            }
        };

        let mut reports = Vec::new();
        for (position, record) in pending.iter().enumerate() {
            if shutdown.is_triggered() {
                break;
            }
            if let Err(wait) = self.breaker.admit() {
                obs::emit_worker_paused(index, pending.len() - position, wait.as_millis() as u64);
                break;
            }

            match lifecycle.claim(record).await {
                Ok(()) => {}
                Err(LifecycleError::FileMissing(_)) => {
                    debug!(worker = index, image_id = %record.id, "claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    warn!(worker = index, image_id = %record.id, error = %e, "claim failed");
                    continue;
                }
            }
            obs::emit_image_claimed(record.id.as_str(), index);

            let report = self.pipeline.process_claimed(&record.id, shutdown).await;
            if report.backend_unreachable() {
                let consecutive = self.breaker.record_failure();
                debug!(consecutive, "inference backend unreachable for whole image");
            } else if report.reached_backend() {
                self.breaker.record_success();
            }
            reports.push(report);
        }
        reports
    }
}
