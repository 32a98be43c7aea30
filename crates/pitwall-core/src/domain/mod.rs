//! Domain model for the extraction pipeline.

pub mod datatype;
pub mod error;
pub mod extraction;
pub mod image;

pub use datatype::{Datatype, DatatypeSpec};
pub use error::{ErrorCode, LifecycleError, PipelineError};
pub use extraction::{ExtractionResult, ExtractionTask, Outcome};
pub use image::{ImageId, ImageRecord, ImageState};
