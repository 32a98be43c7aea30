//! Multimodal inference client for pitwall
//!
//! Sends a captured frame plus a datatype-specific prompt to a vision model
//! and hands back the model's raw text. The client never retries and never
//! interprets the text; both belong to the caller.

mod error;
pub mod fakes;
mod ollama;

pub use error::InferenceError;
pub use ollama::{OllamaClient, DEFAULT_OLLAMA_HOST};

use async_trait::async_trait;

/// Result type for inference calls
pub type Result<T> = std::result::Result<T, InferenceError>;

/// A backend able to answer a prompt about an image.
///
/// Preconditions: `image` and `prompt` are non-empty. Violating them is a
/// caller bug and panics rather than returning a backend error.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, image: &[u8], prompt: &str, model: &str) -> Result<String>;
}
