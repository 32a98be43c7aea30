//! Structured events for the image lifecycle.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! regardless of message text. [`image_span`] tags everything logged while one
//! image is being processed with its `image_id`.

use tracing::{info, warn};

use crate::domain::{ErrorCode, ImageState};

/// Image-scoped span, attached to a future with `.instrument(...)`.
pub fn image_span(image_id: &str) -> tracing::Span {
    tracing::info_span!("pitwall.image", image_id = %image_id)
}

pub fn emit_image_claimed(image_id: &str, worker: usize) {
    info!(event = "image.claimed", image_id = %image_id, worker = worker);
}

pub fn emit_extraction_succeeded(image_id: &str, datatype: &str, attempts: u32) {
    info!(
        event = "extraction.succeeded",
        image_id = %image_id,
        datatype = %datatype,
        attempts = attempts,
    );
}

pub fn emit_extraction_failed(image_id: &str, datatype: Option<&str>, code: ErrorCode, reason: &str) {
    warn!(
        event = "extraction.failed",
        image_id = %image_id,
        datatype = datatype.unwrap_or("-"),
        code = %code,
        reason = %reason,
    );
}

pub fn emit_image_finished(image_id: &str, state: Option<ImageState>, duration_ms: u64) {
    let state = state.map(|s| s.to_string()).unwrap_or_else(|| "unmoved".into());
    info!(
        event = "image.finished",
        image_id = %image_id,
        state = %state,
        duration_ms = duration_ms,
    );
}

pub fn emit_inference_retry(image_id: &str, datatype: &str, attempt: u32, backoff_ms: u64) {
    warn!(
        event = "inference.retry",
        image_id = %image_id,
        datatype = %datatype,
        attempt = attempt,
        backoff_ms = backoff_ms,
    );
}

/// Inference backend considered down; claiming paused but discovery continues.
pub fn emit_worker_paused(worker: usize, pending: usize, resume_in_ms: u64) {
    warn!(
        event = "worker.paused",
        worker = worker,
        pending = pending,
        resume_in_ms = resume_in_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_span_carries_its_name() {
        let span = image_span("frame_0001.jpg");
        let _entered = span.enter();
        emit_image_claimed("frame_0001.jpg", 0);
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "pitwall.image");
        }
    }
}
