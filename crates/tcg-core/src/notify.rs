//! Completion callbacks
//!
//! When a request names a `callback_url`, its outcome is POSTed there once.
//! Delivery failures are logged and dropped; they never change the result.

use crate::types::{GenerationResult, RequestStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Body posted to a callback URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackPayload {
    pub request_id: String,
    pub status: RequestStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
    pub generated_at: String,
}

impl From<&GenerationResult> for CallbackPayload {
    fn from(result: &GenerationResult) -> Self {
        Self {
            request_id: result.request_id.to_string(),
            status: result.status(),
            success: result.success,
            test_case_id: result.test_case.as_ref().map(|c| c.id.clone()),
            quality_score: result.quality_score(),
            error: result.error.clone(),
            execution_time: result.execution_time,
            generated_at: result.generated_at.to_rfc3339(),
        }
    }
}

/// Delivers request outcomes to their callback URL
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    /// Best effort; implementations log failures instead of returning them
    async fn notify(&self, url: &str, result: &GenerationResult);
}

/// Discards every notification
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl CallbackNotifier for NoopNotifier {
    async fn notify(&self, url: &str, result: &GenerationResult) {
        tracing::debug!(%url, request_id = %result.request_id, "callback skipped");
    }
}

/// JSON POST over HTTP
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    /// Default per-callback timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Notifier whose requests give up after `timeout`
    ///
    /// # Errors
    /// The HTTP client cannot be built
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::new(Client::builder().timeout(timeout).build()?))
    }
}

#[async_trait]
impl CallbackNotifier for HttpNotifier {
    async fn notify(&self, url: &str, result: &GenerationResult) {
        let payload = CallbackPayload::from(result);
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(%url, request_id = %payload.request_id, "callback delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    %url,
                    request_id = %payload.request_id,
                    status = response.status().as_u16(),
                    "callback rejected"
                );
            }
            Err(e) => {
                tracing::warn!(%url, request_id = %payload.request_id, error = %e, "callback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;

    #[test]
    fn failure_payload_carries_error() {
        let result = GenerationResult::failure(RequestId::new(), "empty requirement", 0.01);
        let payload = CallbackPayload::from(&result);
        assert_eq!(payload.status, RequestStatus::Failed);
        assert!(!payload.success);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "empty requirement");
        assert!(json.get("quality_score").is_none());
        assert!(json.get("test_case_id").is_none());
    }

    #[tokio::test]
    async fn unreachable_callback_is_absorbed() {
        let notifier = HttpNotifier::with_timeout(Duration::from_millis(200)).unwrap();
        let result = GenerationResult::failure(RequestId::new(), "x", 0.0);
        // Port 9 (discard) on localhost is normally closed; either way notify returns.
        notifier.notify("http://127.0.0.1:9/hook", &result).await;
    }
}
