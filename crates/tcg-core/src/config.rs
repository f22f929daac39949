//! Application configuration
//!
//! One explicit [`AppConfig`] is built at process start and handed to each
//! component's constructor. Sources, later wins:
//! - built-in defaults
//! - a TOML file
//! - environment variables (`DEEPSEEK_API_KEY`, `DEEPSEEK_BASE_URL`,
//!   `TCG_MAX_CONCURRENT_TASKS`)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tcg_inference::InferenceConfig;

pub use tcg_knowledge::StoreConfig as KnowledgeConfig;

/// Environment variable overriding the worker count
pub const MAX_TASKS_ENV_VAR: &str = "TCG_MAX_CONCURRENT_TASKS";

/// Request pipeline and worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Worker tasks pulling from the request queue
    pub max_concurrent_tasks: usize,
    /// Bounded queue length
    pub queue_capacity: usize,
    /// Per-request processing budget
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Use the inference service in stages that support it
    pub enable_ai_enhancement: bool,
    /// Feed finished cases back into the knowledge store
    pub enable_learning: bool,
    /// Quality score at or above which a case counts as a success
    pub learning_quality_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            queue_capacity: 100,
            request_timeout: Duration::from_secs(300),
            enable_ai_enhancement: true,
            enable_learning: true,
            learning_quality_threshold: 0.7,
        }
    }
}

impl WorkflowConfig {
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ai_enhancement(mut self, enabled: bool) -> Self {
        self.enable_ai_enhancement = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_learning(mut self, enabled: bool) -> Self {
        self.enable_learning = enabled;
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub knowledge: KnowledgeConfig,
    pub workflow: WorkflowConfig,
}

impl AppConfig {
    #[inline]
    #[must_use]
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: KnowledgeConfig) -> Self {
        self.knowledge = knowledge;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_workflow(mut self, workflow: WorkflowConfig) -> Self {
        self.workflow = workflow;
        self
    }
}

/// Load configuration from an optional TOML file, then apply env overrides.
///
/// A missing `path` yields the defaults. The result is validated.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.to_path_buf(),
            })?;
            parse_toml(&content)?
        }
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Parse a TOML string into an [`AppConfig`]
pub fn parse_toml(content: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str::<AppConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `DEEPSEEK_API_KEY`
/// - `DEEPSEEK_BASE_URL`
/// - `TCG_MAX_CONCURRENT_TASKS` (ignored unless a positive integer)
pub fn apply_env_overrides(config: &mut AppConfig) {
    config.inference = std::mem::take(&mut config.inference).with_env_overrides();
    if let Ok(val) = std::env::var(MAX_TASKS_ENV_VAR) {
        match val.trim().parse::<usize>() {
            Ok(n) if n > 0 => config.workflow.max_concurrent_tasks = n,
            _ => tracing::warn!(value = %val, "ignoring invalid {MAX_TASKS_ENV_VAR}"),
        }
    }
}

/// Reject configurations the pipeline cannot run with
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.workflow.max_concurrent_tasks == 0 {
        errors.push("workflow.max_concurrent_tasks must be at least 1".to_string());
    }
    if config.workflow.queue_capacity == 0 {
        errors.push("workflow.queue_capacity must be at least 1".to_string());
    }
    if config.workflow.request_timeout.is_zero() {
        errors.push("workflow.request_timeout must be positive".to_string());
    }
    if !(0.0..=1.0).contains(&config.workflow.learning_quality_threshold) {
        errors.push("workflow.learning_quality_threshold must be within 0..=1".to_string());
    }
    if config.inference.max_concurrent_calls == 0 {
        errors.push("inference.max_concurrent_calls must be at least 1".to_string());
    }
    if config.inference.base_url.trim().is_empty() {
        errors.push("inference.base_url must not be empty".to_string());
    }
    if config.knowledge.dimension == 0 {
        errors.push("knowledge.dimension must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
