//! Error types for TCG Core
//!
//! Most pipeline stages recover locally (inference failures fall back to
//! rules or defaults). What reaches the caller is limited to:
//! - knowledge store consistency violations
//! - an unreadable or empty requirement
//! - worker pool failures (full queue, shutdown, cancellation, timeout)
//! - configuration problems

use std::path::PathBuf;
use tcg_inference::InferenceError;
use tcg_knowledge::KnowledgeError;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Knowledge store failure
    #[error("knowledge store error: {0}")]
    Knowledge(#[from] KnowledgeError),

    /// Inference service failure that a stage chose not to absorb
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    /// The request itself cannot be processed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Document collaborator could not produce text
    #[error("document error on {path}: {reason}")]
    Document { path: PathBuf, reason: String },

    /// Request exceeded its processing budget
    #[error("request timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Request was abandoned by its caller
    #[error("request cancelled")]
    Cancelled,

    /// Worker pool error
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Inference(e) => e.is_retryable(),
            Self::Timeout { .. } | Self::Pool(PoolError::QueueFull(_)) => true,
            _ => false,
        }
    }

    /// Hard-fail conditions: index divergence and an unusable requirement
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Knowledge(e) => e.is_consistency_violation(),
            Self::InvalidRequest(_) => true,
            _ => false,
        }
    }

    /// Create document error
    pub fn document(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Document {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Bounded queue at capacity
    #[error("request queue full (capacity: {0})")]
    QueueFull(usize),

    /// Pool no longer accepts work
    #[error("worker pool is shut down")]
    ShutDown,

    /// Unknown request id
    #[error("request not found: {0}")]
    NotFound(String),

    /// Worker went away without reporting
    #[error("result channel closed for request {0}")]
    ResultDropped(String),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// The file could not be parsed as TOML
    #[error("failed to parse config: {reason}")]
    ParseError { reason: String },

    /// Values parsed but are not usable
    #[error("invalid configuration: {}", reasons.join("; "))]
    ValidationError { reasons: Vec<String> },
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
