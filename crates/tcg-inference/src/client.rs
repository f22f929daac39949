//! Inference client
//!
//! Wraps a [`ChatTransport`] with:
//! - per-call timeout and exponential backoff ([`retry_async`])
//! - a semaphore bounding in-flight calls
//! - running token/latency statistics

use crate::error::InferenceError;
use crate::json::extract_json;
use crate::retry::{retry_async, RetryConfig};
use crate::transport::{ChatTransport, HttpTransport, UnconfiguredTransport, AUTH_ENV_VAR};
use crate::types::{ChatMessage, ChatRequest, ChatResponse};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Environment variable overriding the service base URL
pub const BASE_URL_ENV_VAR: &str = "DEEPSEEK_BASE_URL";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_concurrent_calls: usize,
    pub retry: RetryConfig,
    /// Never written back out; read from config or `DEEPSEEK_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            max_concurrent_calls: 5,
            retry: RetryConfig::default(),
            api_key: None,
        }
    }
}

impl InferenceConfig {
    /// Apply `DEEPSEEK_API_KEY` / `DEEPSEEK_BASE_URL` when set
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(AUTH_ENV_VAR) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var(BASE_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_concurrent_calls(mut self, n: usize) -> Self {
        self.max_concurrent_calls = n.max(1);
        self
    }

    /// Whether a non-empty key is present
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Snapshot of client statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub average_response_ms: f64,
}

impl ClientStats {
    /// Fraction of successful calls, 0 when nothing was sent
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    fn record(&mut self, ok: bool, elapsed: Duration, tokens: u64) {
        self.total_requests += 1;
        if ok {
            self.successful_requests += 1;
            self.total_tokens += tokens;
            let n = self.successful_requests as f64;
            let ms = elapsed.as_secs_f64() * 1000.0;
            self.average_response_ms += (ms - self.average_response_ms) / n;
        } else {
            self.failed_requests += 1;
        }
    }
}

/// Chat-completion client with retry, timeout and bounded concurrency
pub struct InferenceClient {
    transport: Arc<dyn ChatTransport>,
    config: InferenceConfig,
    permits: Arc<Semaphore>,
    stats: Mutex<ClientStats>,
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .field("max_concurrent_calls", &self.config.max_concurrent_calls)
            .finish_non_exhaustive()
    }
}

impl InferenceClient {
    /// Client over an explicit transport
    #[must_use]
    pub fn with_transport(transport: Arc<dyn ChatTransport>, config: InferenceConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls.max(1)));
        Self {
            transport,
            config,
            permits,
            stats: Mutex::new(ClientStats::default()),
        }
    }

    /// HTTP client when a key is configured; otherwise every call fails with
    /// `NotConfigured`.
    ///
    /// # Errors
    /// `InferenceError::Transport` if the HTTP client cannot be built
    pub fn from_config(config: InferenceConfig) -> Result<Self, InferenceError> {
        let transport: Arc<dyn ChatTransport> = match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                info!(target: "tcg.inference", base_url = %config.base_url, model = %config.model, "using HTTP transport");
                Arc::new(HttpTransport::new(
                    &config.base_url,
                    key,
                    config.retry.call_timeout,
                )?)
            }
            _ => {
                warn!(target: "tcg.inference", "no {AUTH_ENV_VAR} configured, inference disabled");
                Arc::new(UnconfiguredTransport)
            }
        };
        Ok(Self::with_transport(transport, config))
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        *self.stats.lock()
    }

    /// Send `messages`, returning the full response.
    ///
    /// # Errors
    /// - `Authentication` immediately on 401/403
    /// - `RetriesExhausted` when transient failures outlast the retry budget
    /// - `EmptyResponse` when the service returns no choices
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse, InferenceError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InferenceError::Cancelled)?;

        metrics::counter!("tcg_inference_calls_total").increment(1);
        let started = Instant::now();
        let transport = &self.transport;
        let request = &request;
        let result = retry_async(&self.config.retry, move || async move {
            let response = transport.send(request).await?;
            if response.choices.is_empty() {
                return Err(InferenceError::EmptyResponse);
            }
            Ok(response)
        })
        .await;
        let elapsed = started.elapsed();

        match result {
            Ok((response, retry)) => {
                let tokens = response.usage.map_or(0, |u| u.total_tokens);
                self.stats.lock().record(true, elapsed, tokens);
                debug!(
                    target: "tcg.inference",
                    attempts = retry.attempts,
                    tokens,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "chat completed"
                );
                Ok(response)
            }
            Err(e) => {
                self.stats.lock().record(false, elapsed, 0);
                warn!(target: "tcg.inference", error = %e, "chat failed");
                Err(e)
            }
        }
    }

    /// System + user prompt, returning the first choice's text
    ///
    /// # Errors
    /// See [`InferenceClient::chat`]
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let response = self
            .chat(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .await?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or(InferenceError::EmptyResponse)
    }

    /// Like [`InferenceClient::complete`], parsing the first JSON value in
    /// the reply as `T`.
    ///
    /// # Errors
    /// `MalformedResponse` when no JSON is found or it does not match `T`
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<T, InferenceError> {
        let text = self.complete(system, user).await?;
        parse_json_reply(&text)
    }

    /// Run several conversations concurrently. Concurrency is bounded by
    /// the client semaphore; results keep input order.
    pub async fn batch_chat(
        &self,
        conversations: Vec<Vec<ChatMessage>>,
    ) -> Vec<Result<ChatResponse, InferenceError>> {
        futures::future::join_all(conversations.into_iter().map(|m| self.chat(m))).await
    }

    /// [`InferenceClient::complete_json`] for several user prompts sharing one
    /// system prompt, sent through [`InferenceClient::batch_chat`]. Results
    /// keep prompt order.
    pub async fn batch_complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompts: &[String],
    ) -> Vec<Result<T, InferenceError>> {
        let conversations = prompts
            .iter()
            .map(|p| vec![ChatMessage::system(system), ChatMessage::user(p.as_str())])
            .collect();
        self.batch_chat(conversations)
            .await
            .into_iter()
            .map(|reply| {
                let reply = reply?;
                let text = reply.first_content().ok_or(InferenceError::EmptyResponse)?;
                parse_json_reply(text)
            })
            .collect()
    }
}

fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, InferenceError> {
    let json = extract_json(text)
        .ok_or_else(|| InferenceError::MalformedResponse("no JSON value in reply".to_string()))?;
    serde_json::from_str(json).map_err(|e| InferenceError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the last user message; tracks peak concurrency.
    #[derive(Default)]
    struct EchoTransport {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for EchoTransport {
        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ChatResponse::from_text(last))
        }
    }

    fn config() -> InferenceConfig {
        InferenceConfig::default()
            .with_max_concurrent_calls(2)
            .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let client = InferenceClient::with_transport(Arc::new(EchoTransport::default()), config());
        let text = client.complete("sys", "hello").await.unwrap();
        assert_eq!(text, "hello");
        let stats = client.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
    }

    #[tokio::test]
    async fn batch_respects_concurrency_limit() {
        let transport = Arc::new(EchoTransport::default());
        let client = InferenceClient::with_transport(transport.clone(), config());
        let convs = (0..8).map(|i| vec![ChatMessage::user(format!("m{i}"))]).collect();
        let results = client.batch_chat(convs).await;

        assert_eq!(results.len(), 8);
        assert_eq!(results[3].as_ref().unwrap().first_content(), Some("m3"));
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn complete_json_extracts_fenced_object() {
        #[derive(Deserialize)]
        struct Reply {
            ok: bool,
        }
        let client = InferenceClient::with_transport(Arc::new(EchoTransport::default()), config());
        let reply: Reply = client
            .complete_json("sys", "结果如下:\n```json\n{\"ok\": true}\n```")
            .await
            .unwrap();
        assert!(reply.ok);
    }

    #[tokio::test]
    async fn batch_complete_json_keeps_order_and_isolates_failures() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Reply {
            n: u32,
        }
        let transport = Arc::new(EchoTransport::default());
        let client = InferenceClient::with_transport(transport.clone(), config());
        let prompts: Vec<String> = vec![
            "{\"n\": 1}".into(),
            "没有JSON".into(),
            "```json\n{\"n\": 3}\n```".into(),
            "{\"n\": 4}".into(),
        ];

        let results = client.batch_complete_json::<Reply>("sys", &prompts).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap(), &Reply { n: 1 });
        assert!(matches!(results[1], Err(InferenceError::MalformedResponse(_))));
        assert_eq!(results[2].as_ref().unwrap(), &Reply { n: 3 });
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unconfigured_client_fails_fast() {
        let client = InferenceClient::from_config(InferenceConfig::default()).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, InferenceError::NotConfigured(_)));
        assert_eq!(client.stats().failed_requests, 1);
    }

    #[test]
    fn api_key_is_not_serialized() {
        let cfg = InferenceConfig::default().with_api_key("secret");
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(!text.contains("secret"));
        assert!(cfg.has_credentials());
    }
}
