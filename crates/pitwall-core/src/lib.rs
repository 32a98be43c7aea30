//! Pitwall-Core: extraction pipeline for broadcast graphics
//!
//! Captured frames land in a pending directory. Each frame is sent to a
//! multimodal model once per configured datatype, the JSON answers are
//! shape-checked, valid values are persisted, and the frame is moved to
//! `processed` or `failed`. Every failure is appended to a failure log.
//!
//! ## Key Components
//!
//! - `validator::validate`: untrusted model output to a classified result
//! - `FileLifecycleManager`: directory-backed image state machine
//! - `Pipeline`: the orchestrator (retry, taint, persistence ordering)
//! - `Worker`: polling worker pool with shutdown and pause handling
//! - `JsonlFailureLog`: durable append-only failure sink

pub mod config;
pub mod domain;
pub mod failure_log;
pub mod fakes;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod retry;
pub mod telemetry;
pub mod validator;
pub mod worker;

pub use config::{ConfigError, InferenceConfig, LoggingConfig, PathsConfig, PipelineConfig};
pub use domain::{
    Datatype, DatatypeSpec, ErrorCode, ExtractionResult, ExtractionTask, ImageId, ImageRecord,
    ImageState, LifecycleError, Outcome, PipelineError,
};
pub use failure_log::{FailureLog, FailureLogEntry, FailureLogError, JsonlFailureLog};
pub use lifecycle::{FileLifecycleManager, LifecycleCounts};
pub use metrics::{MetricsSnapshot, METRICS};
pub use pipeline::{DatatypeReport, DatatypeStatus, ImageReport, Pipeline};
pub use retry::{CircuitBreaker, RetryPolicy};
pub use telemetry::init_tracing;
pub use validator::validate;
pub use worker::{
    shutdown_channel, ShutdownSignal, ShutdownTrigger, Worker, WorkerConfig, WorkerSummary,
};
