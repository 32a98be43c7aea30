//! Pipeline configuration.
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no file)
//! yields a runnable local setup:
//!
//! ```toml
//! [paths]
//! pending_dir = "data/input"
//!
//! [inference]
//! host = "http://localhost:11434"
//! model = "granite3.2-vision:2b"
//!
//! [[datatypes]]
//! name = "current_lap"
//! prompt = "Return the current lap as JSON: {\"lap_number\": <integer>}"
//!
//! [database.primary]
//! host = "db.internal"
//! username = "pitwall"
//! password = "..."
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pitwall_state::DatabaseConfig;
use pitwall_vision::DEFAULT_OLLAMA_HOST;
use serde::{Deserialize, Serialize};

use crate::domain::DatatypeSpec;
use crate::retry::RetryPolicy;
use crate::worker::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Lifecycle directories and the failure log location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub pending_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub failure_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pending_dir: PathBuf::from("data/input"),
            processed_dir: PathBuf::from("data/processed"),
            failed_dir: PathBuf::from("data/failed"),
            failure_log: PathBuf::from("data/failures.jsonl"),
        }
    }
}

/// Multimodal inference backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: "granite3.2-vision:2b".to_string(),
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub inference: InferenceConfig,
    /// Extracted in this order for every image.
    pub datatypes: Vec<DatatypeSpec>,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            inference: InferenceConfig::default(),
            datatypes: default_datatypes(),
            retry: RetryPolicy::default(),
            worker: WorkerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Prompts for the three broadcast graphics datatypes.
pub fn default_datatypes() -> Vec<DatatypeSpec> {
    vec![
        DatatypeSpec::new(
            "current_lap",
            "Read the lap counter in this race broadcast frame. \
             Respond only with JSON: {\"lap_number\": <integer>}",
        ),
        DatatypeSpec::new(
            "timing_table",
            "Read the timing tower in this race broadcast frame. Respond only with JSON: \
             {\"timing_table\": [{\"position\": <integer>, \"driver\": <string>, \
             \"gap\": <string>, \"interval\": <string>}]}",
        ),
        DatatypeSpec::new(
            "tire_info",
            "Read the tyre information shown in this race broadcast frame. Respond only \
             with JSON: {\"tire_info\": [{\"driver\": <string>, \"compound\": <string>, \
             \"age\": <integer laps>}]}",
        ),
    ]
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datatypes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one datatype must be configured".into(),
            ));
        }
        let mut seen = HashSet::new();
        for spec in &self.datatypes {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Invalid("datatype name must not be empty".into()));
            }
            if spec.prompt.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "datatype '{}' has an empty prompt",
                    spec.name
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "datatype '{}' is configured twice",
                    spec.name
                )));
            }
        }

        let p = &self.paths;
        if p.pending_dir == p.processed_dir
            || p.pending_dir == p.failed_dir
            || p.processed_dir == p.failed_dir
        {
            return Err(ConfigError::Invalid(
                "pending, processed and failed directories must be distinct".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.worker.workers == 0 {
            return Err(ConfigError::Invalid("worker.workers must be at least 1".into()));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inference.timeout_secs must be at least 1".into(),
            ));
        }
        if self.inference.model.trim().is_empty() {
            return Err(ConfigError::Invalid("inference.model must not be empty".into()));
        }
        if self.database.max_concurrent_writes == 0 {
            return Err(ConfigError::Invalid(
                "database.max_concurrent_writes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
