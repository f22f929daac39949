//! Test case data model
//!
//! One canonical representation per entity. Constraints and steps are
//! constructed once (from rules, templates or validated inference output)
//! and every later stage works on these types directly.

use crate::taxonomy::{Domain, Subsystem, TestPattern};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Open key/value payload
pub type DataMap = Map<String, Value>;

/// Constraint category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintType {
    Performance,
    Safety,
    Reliability,
    Environmental,
    Compliance,
    Other,
}

impl ConstraintType {
    pub const ALL: [Self; 6] = [
        Self::Performance,
        Self::Safety,
        Self::Reliability,
        Self::Environmental,
        Self::Compliance,
        Self::Other,
    ];

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Safety => "safety",
            Self::Reliability => "reliability",
            Self::Environmental => "environmental",
            Self::Compliance => "compliance",
            Self::Other => "other",
        }
    }

    /// Chinese display name
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Performance => "性能",
            Self::Safety => "安全",
            Self::Reliability => "可靠性",
            Self::Environmental => "环境",
            Self::Compliance => "合规",
            Self::Other => "其他",
        }
    }
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstraintType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("unknown constraint type: {s}"))
    }
}

/// Constraint priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintPriority {
    High,
    Medium,
    Low,
}

impl ConstraintPriority {
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for ConstraintPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "高" => Ok(Self::High),
            "medium" | "中" => Ok(Self::Medium),
            "low" | "低" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A typed, prioritized requirement a test case must verify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub content: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: ConstraintType,
    pub priority: ConstraintPriority,
    pub verification_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_reference: Option<String>,
}

impl Constraint {
    /// Create constraint with medium priority and general verification
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        kind: ConstraintType,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: source.into(),
            kind,
            priority: ConstraintPriority::Medium,
            verification_method: "通用验证".to_string(),
            standard_reference: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: ConstraintPriority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_verification_method(mut self, method: impl Into<String>) -> Self {
        self.verification_method = method.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_standard(mut self, standard: impl Into<String>) -> Self {
        self.standard_reference = Some(standard.into());
        self
    }
}

/// Kind of test step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Setup,
    Stimulus,
    Verification,
    Delay,
    Record,
    Cleanup,
}

impl StepType {
    pub const ALL: [Self; 6] = [
        Self::Setup,
        Self::Stimulus,
        Self::Verification,
        Self::Delay,
        Self::Record,
        Self::Cleanup,
    ];

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Stimulus => "stimulus",
            Self::Verification => "verification",
            Self::Delay => "delay",
            Self::Record => "record",
            Self::Cleanup => "cleanup",
        }
    }

    /// Chinese display name
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Setup => "设置",
            Self::Stimulus => "激励",
            Self::Verification => "验证",
            Self::Delay => "延时",
            Self::Record => "记录",
            Self::Cleanup => "清理",
        }
    }

    /// Ordering phase: setup first, cleanup last, everything else between
    #[inline]
    #[must_use]
    pub fn phase(self) -> u8 {
        match self {
            Self::Setup => 0,
            Self::Cleanup => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("unknown step type: {s}"))
    }
}

/// One step of a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub id: String,
    pub step_number: usize,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub step_type: StepType,
    #[serde(default)]
    pub data: DataMap,
    pub expected_result: String,
    pub verification_method: String,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TestStep {
    #[must_use]
    pub fn new(id: impl Into<String>, step_type: StepType, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_number: 0,
            action: action.into(),
            description: String::new(),
            step_type,
            data: DataMap::new(),
            expected_result: String::new(),
            verification_method: "通用验证".to_string(),
            timeout: None,
            dependencies: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = data;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_expected_result(mut self, expected: impl Into<String>) -> Self {
        self.expected_result = expected.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_verification_method(mut self, method: impl Into<String>) -> Self {
        self.verification_method = method.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Stable partition into setup / middle / cleanup, then renumber from 1
pub fn order_steps(steps: &mut Vec<TestStep>) {
    steps.sort_by_key(|s| s.step_type.phase());
    renumber_steps(steps);
}

/// Reassign dense 1-based step numbers in current order
pub fn renumber_steps(steps: &mut [TestStep]) {
    for (i, step) in steps.iter_mut().enumerate() {
        step.step_number = i + 1;
    }
}

/// Check dense numbering and setup < middle < cleanup ordering
#[must_use]
pub fn is_canonical_order(steps: &[TestStep]) -> bool {
    let dense = steps.iter().enumerate().all(|(i, s)| s.step_number == i + 1);
    let phased = steps
        .windows(2)
        .all(|w| w[0].step_type.phase() <= w[1].step_type.phase());
    dense && phased
}

/// Output of the hierarchical classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub domain: Domain,
    pub subsystem: Subsystem,
    pub test_patterns: Vec<TestPattern>,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub standards: Vec<String>,
    #[serde(default)]
    pub metadata: DataMap,
}

impl ClassificationResult {
    /// Primary pattern, functional testing when none were found
    #[must_use]
    pub fn primary_pattern(&self) -> TestPattern {
        self.test_patterns
            .first()
            .copied()
            .unwrap_or(TestPattern::Functional)
    }

    #[must_use]
    pub fn has_pattern(&self, pattern: TestPattern) -> bool {
        self.test_patterns.contains(&pattern)
    }

    #[must_use]
    pub fn has_standard(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.standards
            .iter()
            .any(|s| s.to_lowercase().contains(&needle))
    }
}

/// Generated test case, the aggregate root of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub domain: Domain,
    pub subsystem: Subsystem,
    pub test_patterns: Vec<TestPattern>,
    pub preconditions: Vec<String>,
    pub test_steps: Vec<TestStep>,
    pub expected_results: Vec<String>,
    pub pass_criteria: String,
    #[serde(default)]
    pub test_data: DataMap,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub standards: Vec<String>,
    #[serde(default)]
    pub metadata: DataMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestCase {
    /// Steps of one type, in sequence order
    pub fn steps_of(&self, step_type: StepType) -> impl Iterator<Item = &TestStep> {
        self.test_steps
            .iter()
            .filter(move |s| s.step_type == step_type)
    }

    /// Apply the canonical step ordering
    pub fn normalize_steps(&mut self) {
        order_steps(&mut self.test_steps);
        self.updated_at = Utc::now();
    }

    /// Lowercased JSON of the step sequence, for lexical coverage checks
    #[must_use]
    pub fn steps_text(&self) -> String {
        serde_json::to_string(&self.test_steps)
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Lowercased JSON of the whole case
    #[must_use]
    pub fn full_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default().to_lowercase()
    }
}
