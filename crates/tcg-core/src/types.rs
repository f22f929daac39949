//! Request and result types at the workflow boundary
//!
//! - [`GenerationRequest`]: requirement text plus optional documents and standards
//! - [`GenerationResult`]: test case, explanations and quality metrics, or an error
//! - [`RequestStatus`]: lifecycle observable by a client

use crate::evaluator::QualityMetrics;
use crate::explainer::Explanations;
use crate::model::TestCase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use ulid::Ulid;

/// Unique request identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Ulid);

impl RequestId {
    /// Generate new request ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Caller-assigned priority, recorded with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Request to generate one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub requirement: String,
    #[serde(default)]
    pub spec_files: Vec<PathBuf>,
    #[serde(default)]
    pub standards: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl GenerationRequest {
    /// Create new request
    #[inline]
    #[must_use]
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            requirement: requirement.into(),
            spec_files: Vec::new(),
            standards: Vec::new(),
            priority: Priority::default(),
            callback_url: None,
        }
    }

    /// With standards to comply with
    #[inline]
    #[must_use]
    pub fn with_standards<I, S>(mut self, standards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.standards = standards.into_iter().map(Into::into).collect();
        self
    }

    /// With specification documents
    #[inline]
    #[must_use]
    pub fn with_spec_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.spec_files = files.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    /// Terminal states never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanations: Option<Explanations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QualityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds
    pub execution_time: f64,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    /// Failed result carrying only the error text
    #[must_use]
    pub fn failure(request_id: RequestId, error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            request_id,
            success: false,
            test_case: None,
            explanations: None,
            metrics: None,
            error: Some(error.into()),
            execution_time,
            generated_at: Utc::now(),
        }
    }

    /// Quality score when the request succeeded
    #[must_use]
    pub fn quality_score(&self) -> Option<f64> {
        self.metrics.as_ref().map(|m| m.quality_score)
    }

    /// Status a client observes for this result
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        if self.success {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let req = GenerationRequest::new("验证BMS均衡功能")
            .with_standards(["ISO 26262"])
            .with_priority(Priority::High)
            .with_callback("http://localhost:9000/hook");
        assert_eq!(req.standards, vec!["ISO 26262".to_string()]);
        assert_eq!(req.priority, Priority::High);
        assert!(req.callback_url.is_some());
    }

    #[test]
    fn request_id_round_trips_through_text() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn failure_reports_failed_status() {
        let result = GenerationResult::failure(RequestId::new(), "boom", 0.1);
        assert_eq!(result.status(), RequestStatus::Failed);
        assert_eq!(result.quality_score(), None);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("test_case").is_none());
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RequestStatus::Submitted.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }
}
