//! Extraction Pipeline
//!
//! The orchestrator is the only place that decides retry vs. terminal failure
//! vs. partial success. For one claimed image it:
//!
//! 1. reads the image bytes once
//! 2. for each configured datatype, in order: infer (retrying only
//!    `BackendUnavailable`), validate, then persist or log the failure
//! 3. moves the image to `processed` if every datatype was persisted,
//!    otherwise to `failed`
//!
//! Records and failure entries are written before the move, so a reader that
//! sees a processed image also sees its data.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use pitwall_state::{ExtractedDataRecord, StorageRouter};
use pitwall_vision::InferenceClient;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::PipelineConfig;
use crate::domain::{
    DatatypeSpec, ErrorCode, ExtractionResult, ExtractionTask, ImageId, ImageRecord, ImageState,
    LifecycleError, PipelineError,
};
use crate::failure_log::{FailureLog, FailureLogEntry};
use crate::lifecycle::FileLifecycleManager;
use crate::metrics::METRICS;
use crate::obs;
use crate::retry::RetryPolicy;
use crate::validator;
use crate::worker::ShutdownSignal;

/// How one datatype ended for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatatypeStatus {
    Persisted,
    Failed { code: ErrorCode, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatatypeReport {
    pub datatype: String,
    #[serde(flatten)]
    pub status: DatatypeStatus,
    /// Inference calls made for this datatype.
    pub attempts: u32,
}

impl DatatypeReport {
    pub fn is_persisted(&self) -> bool {
        self.status == DatatypeStatus::Persisted
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match &self.status {
            DatatypeStatus::Persisted => None,
            DatatypeStatus::Failed { code, .. } => Some(*code),
        }
    }
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub image_id: ImageId,
    /// Where the image ended up. `Pending` means it was released on shutdown;
    /// `None` means the move itself failed and the image was left in place.
    pub final_state: Option<ImageState>,
    pub outcomes: Vec<DatatypeReport>,
    /// Image-level failure (unreadable file, failed move).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_error: Option<(ErrorCode, String)>,
}

impl ImageReport {
    fn new(image_id: &ImageId) -> Self {
        Self {
            image_id: image_id.clone(),
            final_state: None,
            outcomes: Vec::new(),
            image_error: None,
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.image_error.is_some() || self.outcomes.iter().any(|o| !o.is_persisted())
    }

    /// Every datatype failed because the inference backend was unreachable.
    pub fn backend_unreachable(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|o| o.code() == Some(ErrorCode::LlmUnavailable))
    }

    /// At least one datatype got an answer (or a deadline) from the backend.
    pub fn reached_backend(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.code() != Some(ErrorCode::LlmUnavailable))
    }
}

enum Step {
    Done(DatatypeReport),
    Interrupted,
}

/// The extraction orchestrator. Shared by all workers behind an `Arc`.
pub struct Pipeline {
    lifecycle: FileLifecycleManager,
    inference: Arc<dyn InferenceClient>,
    storage: StorageRouter,
    failure_log: Arc<dyn FailureLog>,
    datatypes: Vec<DatatypeSpec>,
    model: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("lifecycle", &self.lifecycle)
            .field("storage", &self.storage)
            .field("datatypes", &self.datatypes)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        lifecycle: FileLifecycleManager,
        inference: Arc<dyn InferenceClient>,
        storage: StorageRouter,
        failure_log: Arc<dyn FailureLog>,
        datatypes: Vec<DatatypeSpec>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lifecycle,
            inference,
            storage,
            failure_log,
            datatypes,
            model: model.into(),
            retry,
        }
    }

    /// Wire a pipeline from configuration and already-connected backends.
    pub fn from_config(
        config: &PipelineConfig,
        inference: Arc<dyn InferenceClient>,
        storage: StorageRouter,
        failure_log: Arc<dyn FailureLog>,
    ) -> Self {
        let paths = &config.paths;
        Self::new(
            FileLifecycleManager::new(
                paths.pending_dir.clone(),
                paths.processed_dir.clone(),
                paths.failed_dir.clone(),
            ),
            inference,
            storage,
            failure_log,
            config.datatypes.clone(),
            config.inference.model.clone(),
            config.retry.clone(),
        )
    }

    pub fn lifecycle(&self) -> &FileLifecycleManager {
        &self.lifecycle
    }

    pub fn storage(&self) -> &StorageRouter {
        &self.storage
    }

    pub fn failure_log(&self) -> &Arc<dyn FailureLog> {
        &self.failure_log
    }

    pub fn datatypes(&self) -> &[DatatypeSpec] {
        &self.datatypes
    }

    /// Process one image that is already in the pending location, now.
    ///
    /// Claims it exactly like the background worker does, so the two can
    /// never process the same image.
    pub async fn process_now(&self, name: &str) -> Result<ImageReport, PipelineError> {
        let id = ImageId::new(name)?;
        if !id.has_image_extension() {
            return Err(LifecycleError::InvalidName(id.to_string()).into());
        }
        let record = ImageRecord {
            id,
            state: ImageState::Pending,
            discovered_at: Utc::now(),
        };
        self.lifecycle.claim(&record).await?;
        obs::emit_image_claimed(record.id.as_str(), 0);
        Ok(self.process_claimed(&record.id, &ShutdownSignal::never()).await)
    }

    /// Store freshly supplied image bytes as a pending image and process it.
    pub async fn submit_and_process(
        &self,
        name: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<ImageReport, PipelineError> {
        let id = self.lifecycle.submit(name, bytes).await?;
        info!(image_id = %id, "manual image submitted");
        self.process_now(id.as_str()).await
    }

    /// Run every datatype for a claimed image and move it to its terminal state.
    ///
    /// Never fails: every error becomes part of the report and, where it
    /// concerns the image, a failure log entry.
    pub async fn process_claimed(&self, id: &ImageId, shutdown: &ShutdownSignal) -> ImageReport {
        self.process_inner(id, shutdown)
            .instrument(obs::image_span(id.as_str()))
            .await
    }

    async fn process_inner(&self, id: &ImageId, shutdown: &ShutdownSignal) -> ImageReport {
        let started = Instant::now();
        let mut report = ImageReport::new(id);

        let image = match self.lifecycle.read_image(id).await {
            Ok(bytes) if bytes.is_empty() => {
                self.image_failure(&mut report, ErrorCode::FilesystemError, "image file is empty")
                    .await;
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.image_failure(&mut report, e.code(), &e.to_string()).await;
                if matches!(e, LifecycleError::FileMissing(_)) {
                    // Nothing left to move.
                    obs::emit_image_finished(id.as_str(), None, elapsed_ms(started));
                    return report;
                }
                None
            }
        };

        if let Some(image) = image {
            for spec in &self.datatypes {
                if shutdown.is_triggered() {
                    return self.release(report, started).await;
                }
                match self.extract(id, spec, &image, shutdown).await {
                    Step::Done(outcome) => report.outcomes.push(outcome),
                    Step::Interrupted => return self.release(report, started).await,
                }
            }
        }

        self.finish(&mut report).await;
        obs::emit_image_finished(id.as_str(), report.final_state, elapsed_ms(started));
        report
    }

    /// One datatype: inference with retry, validation, then persist or log.
    async fn extract(
        &self,
        id: &ImageId,
        spec: &DatatypeSpec,
        image: &[u8],
        shutdown: &ShutdownSignal,
    ) -> Step {
        let datatype = spec.datatype();
        let task = ExtractionTask {
            image_id: id,
            datatype: &datatype,
            prompt: &spec.prompt,
        };

        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match self.inference.infer(image, task.prompt, &self.model).await {
                Ok(raw) => break validator::validate(&raw, task.datatype),
                Err(e) if e.is_retryable() && attempts < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempts);
                    debug!(error = %e, "inference backend unavailable");
                    obs::emit_inference_retry(
                        id.as_str(),
                        task.datatype.name(),
                        attempts,
                        backoff.as_millis() as u64,
                    );
                    METRICS.inc_inference_retries();
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.wait() => return Step::Interrupted,
                    }
                }
                Err(e) => break ExtractionResult::from_inference_error(datatype.clone(), &e),
            }
        };

        Step::Done(self.record_result(task, result, attempts).await)
    }

    #[instrument(skip_all, fields(datatype = %task.datatype))]
    async fn record_result(
        &self,
        task: ExtractionTask<'_>,
        result: ExtractionResult,
        attempts: u32,
    ) -> DatatypeReport {
        let name = task.datatype.name().to_string();

        let (code, reason) = match (result.outcome.error_code(), result.parsed) {
            (None, Some(value)) => {
                let record = ExtractedDataRecord::new(task.image_id.as_str(), name.as_str(), value);
                match self.storage.persist(&record).await {
                    Ok(()) => {
                        METRICS.inc_extractions_succeeded();
                        obs::emit_extraction_succeeded(task.image_id.as_str(), &name, attempts);
                        return DatatypeReport {
                            datatype: name,
                            status: DatatypeStatus::Persisted,
                            attempts,
                        };
                    }
                    Err(e) => (ErrorCode::StorageUnavailable, e.to_string()),
                }
            }
            (Some(code), _) => (
                code,
                result.reason.unwrap_or_else(|| "extraction failed".into()),
            ),
            // A success always carries a parsed value.
            (None, None) => (
                ErrorCode::ValidationFailed,
                "validator returned no value".to_string(),
            ),
        };

        METRICS.inc_extractions_failed();
        obs::emit_extraction_failed(task.image_id.as_str(), Some(&name), code, &reason);
        let entry = FailureLogEntry::new(task.image_id, Some(&name), code, reason.clone())
            .with_raw_response(result.raw_text);
        self.append_failure(&entry).await;

        DatatypeReport {
            datatype: name,
            status: DatatypeStatus::Failed { code, reason },
            attempts,
        }
    }

    /// Move the image according to its taint; a failed move is itself logged.
    async fn finish(&self, report: &mut ImageReport) {
        let id = report.image_id.clone();
        let target = if report.is_tainted() {
            ImageState::Failed
        } else {
            ImageState::Processed
        };
        let moved = match target {
            ImageState::Processed => self.lifecycle.mark_processed(&id).await,
            _ => self.lifecycle.mark_failed(&id).await,
        };

        match moved {
            Ok(()) => report.final_state = Some(target),
            Err(e) => {
                let reason = format!("could not move image to {target}: {e}");
                self.image_failure(report, e.code(), &reason).await;
                if target == ImageState::Processed && matches!(e, LifecycleError::FileSystem { .. }) {
                    match self.lifecycle.mark_failed(&id).await {
                        Ok(()) => report.final_state = Some(ImageState::Failed),
                        Err(e) => error!(image_id = %id, error = %e, "image left in pending"),
                    }
                }
            }
        }

        match report.final_state {
            Some(ImageState::Processed) => METRICS.inc_images_processed(),
            Some(ImageState::Failed) => METRICS.inc_images_failed(),
            _ => {}
        }
    }

    /// Return an interrupted image to pending; persisted records are idempotent.
    async fn release(&self, mut report: ImageReport, started: Instant) -> ImageReport {
        match self.lifecycle.release(&report.image_id).await {
            Ok(()) => {
                info!(
                    image_id = %report.image_id,
                    completed = report.outcomes.len(),
                    "shutdown requested, image returned to pending"
                );
                report.final_state = Some(ImageState::Pending);
            }
            Err(e) => {
                warn!(image_id = %report.image_id, error = %e, "could not release image");
            }
        }
        obs::emit_image_finished(report.image_id.as_str(), report.final_state, elapsed_ms(started));
        report
    }

    async fn image_failure(&self, report: &mut ImageReport, code: ErrorCode, reason: &str) {
        obs::emit_extraction_failed(report.image_id.as_str(), None, code, reason);
        let entry = FailureLogEntry::new(&report.image_id, None, code, reason);
        self.append_failure(&entry).await;
        report.image_error = Some((code, reason.to_string()));
    }

    async fn append_failure(&self, entry: &FailureLogEntry) {
        if let Err(e) = self.failure_log.append(entry).await {
            // Keep the entry in the process log so it is not lost outright.
            error!(
                error = %e,
                image_id = %entry.image_id,
                datatype = entry.datatype.as_deref().unwrap_or("-"),
                code = %entry.code,
                message = %entry.message,
                "failed to append failure log entry"
            );
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
