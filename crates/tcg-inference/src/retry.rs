//! Retry with exponential backoff for inference calls
//!
//! Each attempt is wrapped in a per-call timeout. Transient failures back off
//! `base_delay * 2^attempt` (capped); authentication failures and other
//! non-retryable errors return immediately.

use crate::error::InferenceError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Cap on a single backoff delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Timeout applied to every attempt
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Serde helper: `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        u64::try_from(val.as_millis()).unwrap_or(u64::MAX).serialize(ser)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Backoff delay before retry number `attempt` (zero-indexed)
#[must_use]
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u32.saturating_pow(attempt);
    config.base_delay.saturating_mul(exp).min(config.max_delay)
}

/// Outcome metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Attempts made, including the last one
    pub attempts: u32,
}

/// Run `op` with per-attempt timeout and bounded retries.
///
/// # Errors
/// - the first non-retryable error, unchanged
/// - `InferenceError::RetriesExhausted` wrapping the last transient error
pub async fn retry_async<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
) -> Result<(T, RetryStats), InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut last = None;

    for attempt in 0..max_attempts {
        debug!(target: "tcg.inference.retry", attempt, max_attempts, "attempting call");

        let result = match tokio::time::timeout(config.call_timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(InferenceError::Timeout {
                duration_ms: u64::try_from(config.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(value) => {
                return Ok((
                    value,
                    RetryStats {
                        attempts: attempt + 1,
                    },
                ))
            }
            Err(e) if !e.is_retryable() => {
                if e.is_auth() {
                    warn!(target: "tcg.inference.retry", error = %e, "authentication failure, not retrying");
                }
                return Err(e);
            }
            Err(e) => {
                metrics::counter!("tcg_inference_retries_total").increment(1);
                if attempt + 1 < max_attempts {
                    let delay = compute_delay(config, attempt);
                    warn!(
                        target: "tcg.inference.retry",
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                last = Some(e);
            }
        }
    }

    Err(InferenceError::RetriesExhausted {
        attempts: max_attempts,
        last: Box::new(last.unwrap_or(InferenceError::EmptyResponse)),
    })
}
