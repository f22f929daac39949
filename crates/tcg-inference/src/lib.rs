//! TCG Inference - chat-completion client
//!
//! Thin client for an OpenAI-compatible chat endpoint (DeepSeek by default):
//! - bounded concurrency via a semaphore
//! - per-call timeout with exponential backoff on transient failures
//! - immediate failure on authentication errors
//! - pluggable [`ChatTransport`] so tests and offline runs need no network
//!
//! # Example
//!
//! ```rust,ignore
//! use tcg_inference::{InferenceClient, InferenceConfig};
//!
//! # async fn example() -> Result<(), tcg_inference::InferenceError> {
//! let client = InferenceClient::from_config(InferenceConfig::default().with_env_overrides())?;
//! let reply = client.complete("你是一名汽车测试工程师", "列出HIL测试的前置条件").await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod error;
pub mod json;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::{ClientStats, InferenceClient, InferenceConfig, BASE_URL_ENV_VAR};
pub use error::InferenceError;
pub use json::extract_json;
pub use retry::{compute_delay, retry_async, RetryConfig, RetryStats};
pub use transport::{ChatTransport, HttpTransport, UnconfiguredTransport, AUTH_ENV_VAR};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, ChoiceMessage, Role, Usage};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for calling the inference service
    pub use crate::{
        ChatMessage, ChatTransport, InferenceClient, InferenceConfig, InferenceError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
