//! Scripted inference client (testing only)
//!
//! Replies are queued per prompt. When a prompt's queue is empty the default
//! reply is returned; without a default the call fails as unavailable.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::InferenceError;
use crate::{InferenceClient, Result};

/// One recorded `infer` call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferCall {
    pub image: Vec<u8>,
    pub prompt: String,
    pub model: String,
}

#[derive(Default)]
pub struct ScriptedInferenceClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<String>>>>,
    default_reply: Mutex<Option<Result<String>>>,
    calls: Mutex<Vec<InferCall>>,
    delay: Option<Duration>,
}

impl ScriptedInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used when no scripted reply is queued for a prompt.
    pub fn with_default(self, reply: Result<String>) -> Self {
        *self.default_reply.lock().unwrap() = Some(reply);
        self
    }

    /// Sleep before every reply (exercises concurrency and cancellation).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply for `prompt`.
    pub fn push(&self, prompt: &str, reply: Result<String>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(prompt.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue the same reply `times` times.
    pub fn push_repeated(&self, prompt: &str, reply: Result<String>, times: usize) -> &Self {
        for _ in 0..times {
            self.push(prompt, reply.clone());
        }
        self
    }

    pub fn calls(&self) -> Vec<InferCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_prompt(&self, prompt: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.prompt == prompt)
            .count()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInferenceClient {
    async fn infer(&self, image: &[u8], prompt: &str, model: &str) -> Result<String> {
        assert!(!image.is_empty(), "inference requires a non-empty image");
        assert!(!prompt.is_empty(), "inference requires a non-empty prompt");

        self.calls.lock().unwrap().push(InferCall {
            image: image.to_vec(),
            prompt: prompt.to_string(),
            model: model.to_string(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(prompt)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(reply) => reply,
            None => self.default_reply.lock().unwrap().clone().unwrap_or_else(|| {
                Err(InferenceError::Unavailable(format!(
                    "no scripted reply for prompt: {prompt}"
                )))
            }),
        }
    }
}
