//! Transport seam between the client and the chat-completion service

use crate::error::InferenceError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Environment variable holding the API key
pub const AUTH_ENV_VAR: &str = "DEEPSEEK_API_KEY";

/// Sends one chat request. No retry, no timeout: the client layers those on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError>;
}

/// Transport used when no credentials are configured. Every call fails with
/// `NotConfigured`, so callers take their deterministic path.
#[derive(Debug, Default)]
pub struct UnconfiguredTransport;

#[async_trait]
impl ChatTransport for UnconfiguredTransport {
    async fn send(&self, _request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        Err(InferenceError::NotConfigured(format!("missing {AUTH_ENV_VAR}")))
    }
}

/// HTTP transport for OpenAI-compatible `/chat/completions` endpoints
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    /// Build transport for `base_url` (e.g. `https://api.deepseek.com`)
    ///
    /// # Errors
    /// `InferenceError::NotConfigured` for an empty key, `Transport` if the
    /// HTTP client cannot be built
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(InferenceError::NotConfigured("empty api key".to_string()));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| InferenceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Endpoint this transport posts to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout { duration_ms: 0 }
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(320).collect();
            return Err(InferenceError::from_status(status, body)
                .unwrap_or(InferenceError::Http { status, body: String::new() }));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let t = HttpTransport::new("https://api.deepseek.com/", "k", Duration::from_secs(5)).unwrap();
        assert_eq!(t.endpoint(), "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = HttpTransport::new("https://x", " ", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, InferenceError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unconfigured_transport_fails() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![],
            temperature: 0.0,
            max_tokens: 1,
            stream: false,
        };
        let err = UnconfiguredTransport.send(&req).await.unwrap_err();
        assert!(matches!(err, InferenceError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }
}
