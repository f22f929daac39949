//! Error types for the inference client
//!
//! The taxonomy drives retry policy:
//! - transient (timeout, rate limit, transport, 5xx): retried with backoff
//! - authentication (401/403): fails immediately, never retried
//! - malformed response: not retried, callers fall back to deterministic paths

/// Inference client error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// Single call exceeded its timeout
    #[error("inference call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Service returned 429
    #[error("rate limited by inference service")]
    RateLimited,

    /// Service returned 401 or 403
    #[error("authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Any other non-success status
    #[error("inference service error {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Response had no choices
    #[error("response contained no choices")]
    EmptyResponse,

    /// No credentials / endpoint configured
    #[error("inference service not configured: {0}")]
    NotConfigured(String),

    /// Retries used up
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<InferenceError> },

    /// Caller went away
    #[error("inference call cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if error is an authentication/permission failure
    #[inline]
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_auth(),
            _ => false,
        }
    }

    /// Map an HTTP status to an error, `None` for success
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            401 => Some(Self::Authentication {
                status,
                message: "api key invalid or expired".to_string(),
            }),
            403 => Some(Self::Authentication {
                status,
                message: "access denied".to_string(),
            }),
            _ => Some(Self::Http {
                status,
                body: body.into(),
            }),
        }
    }
}
