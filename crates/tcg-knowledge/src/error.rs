//! Error types for the knowledge store
//!
//! Provides error handling for:
//! - Embedding operations (text → vector)
//! - Semantic index operations (vector upsert/query)
//! - Store operations, including index-consistency failures
//! - Export/import

use std::path::PathBuf;

/// Errors produced by an embedder
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    /// Nothing to embed
    #[error("empty input text")]
    EmptyInput,

    /// The model could not be loaded or reached
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Returned vector does not have the configured dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors produced by a semantic index backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// Collection could not be read or written
    #[error("collection '{collection}' unavailable: {reason}")]
    CollectionUnavailable { collection: String, reason: String },

    /// Vector does not match the index dimension
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Backend-specific failure
    #[error("index backend error: {0}")]
    Backend(String),
}

impl IndexError {
    /// Create collection-unavailable error
    pub fn unavailable(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollectionUnavailable {
            collection: collection.into(),
            reason: reason.into(),
        }
    }
}

/// Combined knowledge store error
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The two indexes could not be kept in agreement for an id.
    /// The structured half has already been rolled back when this is returned.
    #[error("store consistency violation for '{id}': {source}")]
    Consistency {
        id: String,
        #[source]
        source: IndexError,
    },

    #[error("knowledge item not found: {0}")]
    NotFound(String),

    #[error("unknown knowledge type: {0}")]
    InvalidType(String),

    #[error("invalid knowledge content: {0}")]
    InvalidContent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KnowledgeError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check whether the error means the two indexes disagreed
    #[inline]
    #[must_use]
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

/// Result type alias for knowledge operations
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_error_display() {
        let err = EmbeddingError::DimensionMismatch {
            expected: 384,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 384, got 12"
        );
    }

    #[test]
    fn index_error_display() {
        let err = IndexError::unavailable("standards", "disk full");
        assert_eq!(
            err.to_string(),
            "collection 'standards' unavailable: disk full"
        );
    }

    #[test]
    fn consistency_violation_detection() {
        let err = KnowledgeError::Consistency {
            id: "standard_x".to_string(),
            source: IndexError::Backend("boom".to_string()),
        };
        assert!(err.is_consistency_violation());
        assert!(!KnowledgeError::NotFound("x".to_string()).is_consistency_violation());
    }

    #[test]
    fn error_conversions() {
        let err: KnowledgeError = EmbeddingError::EmptyInput.into();
        assert!(matches!(err, KnowledgeError::Embedding(_)));
    }
}
