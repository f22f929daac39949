//! Quality evaluation
//!
//! Five sub-scores in 0..=1, combined by fixed weights:
//!
//! | metric | weight | recommendation below |
//! |---|---|---|
//! | completeness | 0.25 | 0.8 |
//! | executability | 0.25 | 0.7 |
//! | constraint_coverage | 0.20 | 0.8 |
//! | standard_compliance | 0.20 | never |
//! | explanation_quality | 0.10 | 0.6 |
//!
//! Missing data lowers a score; evaluation itself cannot fail.

use crate::explainer::Explanations;
use crate::integrator::constraint_coverage;
use crate::model::{Constraint, TestCase};
use serde::{Deserialize, Serialize};

const WEIGHTS: QualityBreakdown = QualityBreakdown {
    completeness: 0.25,
    executability: 0.25,
    constraint_coverage: 0.20,
    standard_compliance: 0.20,
    explanation_quality: 0.10,
};

/// Steps needed for a full step-count score
const FULL_STEP_COUNT: usize = 10;
const MIN_STEP_COUNT: usize = 3;

/// Per-standard keywords checked in the case text
const STANDARD_KEYWORDS: &[(&str, &[&str])] = &[
    ("iso 26262", &["安全", "asil", "故障", "安全机制"]),
    ("iso 21434", &["安全", "网络", "威胁", "攻击"]),
    ("gb/t", &["国标", "标准", "规范"]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub completeness: f64,
    pub executability: f64,
    pub constraint_coverage: f64,
    pub standard_compliance: f64,
    pub explanation_quality: f64,
}

impl QualityBreakdown {
    #[must_use]
    pub fn weighted_sum(&self) -> f64 {
        self.completeness * WEIGHTS.completeness
            + self.executability * WEIGHTS.executability
            + self.constraint_coverage * WEIGHTS.constraint_coverage
            + self.standard_compliance * WEIGHTS.standard_compliance
            + self.explanation_quality * WEIGHTS.explanation_quality
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

/// Improvement suggestion for one weak metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecommendation {
    #[serde(rename = "type")]
    pub metric: String,
    pub priority: RecommendationPriority,
    pub suggestion: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub quality_score: f64,
    pub breakdown: QualityBreakdown,
    #[serde(default)]
    pub recommendations: Vec<QualityRecommendation>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Required sections present (70%) plus step-count adequacy (30%)
#[must_use]
pub fn completeness(case: &TestCase) -> f64 {
    let present = [
        !case.preconditions.is_empty(),
        !case.test_steps.is_empty(),
        !case.expected_results.is_empty(),
        !case.pass_criteria.trim().is_empty(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    let steps = case.test_steps.len();
    let step_score = if steps >= MIN_STEP_COUNT {
        (steps as f64 / FULL_STEP_COUNT as f64).min(1.0)
    } else {
        0.0
    };
    round2(present as f64 / 4.0 * 0.7 + step_score * 0.3)
}

/// Fraction of steps carrying non-empty data
#[must_use]
pub fn executability(case: &TestCase) -> f64 {
    if case.test_steps.is_empty() {
        return 0.0;
    }
    let with_data = case.test_steps.iter().filter(|s| !s.data.is_empty()).count();
    round2(with_data as f64 / case.test_steps.len() as f64)
}

/// Mention of each standard plus its keyword match rate; 1.0 without standards
#[must_use]
pub fn standard_compliance(case: &TestCase, standards: &[String]) -> f64 {
    if standards.is_empty() {
        return 1.0;
    }
    let text = case.full_text();
    let share = 1.0 / standards.len() as f64;
    let mut score = 0.0;
    for standard in standards {
        let lowered = standard.trim().to_lowercase();
        if text.contains(&lowered) {
            score += share;
        }
        if let Some((_, keywords)) = STANDARD_KEYWORDS.iter().find(|(key, _)| lowered.starts_with(key)) {
            let hits = keywords.iter().filter(|k| text.contains(*k)).count();
            score += hits as f64 / keywords.len() as f64 * 0.5 * share;
        }
    }
    round2(score.min(1.0))
}

/// Fraction of the four explanation sections that are substantial
#[must_use]
pub fn explanation_quality(explanations: Option<&Explanations>) -> f64 {
    explanations.map_or(0.0, |e| round2(e.substantial_sections() as f64 / 4.0))
}

fn recommendations(b: &QualityBreakdown) -> Vec<QualityRecommendation> {
    let rules: [(&str, f64, f64, RecommendationPriority, &str, &str); 4] = [
        ("completeness", b.completeness, 0.8, RecommendationPriority::High, "增加测试步骤或完善测试数据", "完整性评分较低"),
        ("executability", b.executability, 0.7, RecommendationPriority::High, "为测试步骤添加具体数据和验证方法", "可执行性评分较低"),
        ("constraint_coverage", b.constraint_coverage, 0.8, RecommendationPriority::Medium, "增加对约束条件的验证", "约束覆盖不足"),
        ("explanation_quality", b.explanation_quality, 0.6, RecommendationPriority::Low, "完善设计决策和逻辑解释", "解释质量有待提高"),
    ];
    rules
        .into_iter()
        .filter(|(_, score, threshold, ..)| score < threshold)
        .map(|(metric, score, _, priority, suggestion, reason)| QualityRecommendation {
            metric: metric.to_string(),
            priority,
            suggestion: suggestion.to_string(),
            reason: format!("{reason} ({score})"),
        })
        .collect()
}

/// Scores a finished test case
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityEvaluator;

impl QualityEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn evaluate(
        &self,
        case: &TestCase,
        explanations: Option<&Explanations>,
        constraints: &[Constraint],
        standards: &[String],
    ) -> QualityMetrics {
        let breakdown = QualityBreakdown {
            completeness: completeness(case),
            executability: executability(case),
            constraint_coverage: round2(constraint_coverage(case, constraints).total_coverage),
            standard_compliance: standard_compliance(case, standards),
            explanation_quality: explanation_quality(explanations),
        };
        let quality_score = round2(breakdown.weighted_sum());
        let recommendations = recommendations(&breakdown);
        tracing::info!(
            case = %case.id,
            quality_score,
            recommendations = recommendations.len(),
            "quality evaluated"
        );
        QualityMetrics {
            quality_score,
            breakdown,
            recommendations,
        }
    }
}
