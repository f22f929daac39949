//! Logic explanations for a generated test case
//!
//! Four sections are derived from the finished case: step design, data
//! selection, constraint handling and design decisions. Each one is built
//! from the case itself, so explanations are available without the
//! inference service.

use crate::model::{ClassificationResult, ConstraintPriority, StepType, TestCase};
use crate::taxonomy::{Domain, Label, Subsystem, TestPattern};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sections shorter than this many characters count as absent
pub const MIN_SECTION_CHARS: usize = 20;
const MAX_RECOMMENDATIONS: usize = 3;

/// Explanation sections plus recommendations and a confidence in 0..=1
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanations {
    pub steps: String,
    pub data: String,
    pub constraints: String,
    pub design_decisions: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

impl Explanations {
    /// The four required sections with their display titles
    #[must_use]
    pub fn sections(&self) -> [(&'static str, &str); 4] {
        [
            ("测试步骤设计解释", self.steps.as_str()),
            ("测试数据选择依据", self.data.as_str()),
            ("约束条件处理说明", self.constraints.as_str()),
            ("设计决策说明", self.design_decisions.as_str()),
        ]
    }

    /// Number of sections longer than [`MIN_SECTION_CHARS`]
    #[must_use]
    pub fn substantial_sections(&self) -> usize {
        self.sections()
            .iter()
            .filter(|(_, text)| text.chars().count() > MIN_SECTION_CHARS)
            .count()
    }

    fn total_chars(&self) -> usize {
        self.sections()
            .iter()
            .map(|(_, text)| text.chars().count())
            .chain(self.recommendations.iter().map(|r| r.chars().count()))
            .sum()
    }

    fn compute_confidence(&self) -> f64 {
        let mut score = self.substantial_sections() as f64 / 4.0;
        if !self.recommendations.is_empty() {
            score += 0.1;
        }
        if self.total_chars() > 500 {
            score += 0.1;
        }
        score.min(1.0)
    }

    /// Titled sections ready for display, in fixed order
    #[must_use]
    pub fn format_for_display(&self) -> IndexMap<&'static str, String> {
        let mut out: IndexMap<&'static str, String> = self
            .sections()
            .into_iter()
            .map(|(title, text)| (title, text.to_string()))
            .collect();
        if !self.recommendations.is_empty() {
            let bullets: Vec<String> = self.recommendations.iter().map(|r| format!("• {r}")).collect();
            out.insert("改进建议", bullets.join("\n"));
        }
        let level = if self.confidence > 0.8 {
            "高"
        } else if self.confidence > 0.6 {
            "中"
        } else {
            "低"
        };
        out.insert("解释置信度", format!("{:.1}% ({level})", self.confidence * 100.0));
        out
    }
}

impl fmt::Display for Explanations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (title, body)) in self.format_for_display().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "【{title}】")?;
            writeln!(f, "{body}")?;
        }
        Ok(())
    }
}

fn prefix(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Builds [`Explanations`] from a finished test case
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicExplainer;

impl LogicExplainer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn explain(&self, case: &TestCase, classification: &ClassificationResult) -> Explanations {
        let mut explanations = Explanations {
            steps: explain_steps(case),
            data: explain_data(case),
            constraints: explain_constraints(case),
            design_decisions: explain_design(case, classification),
            recommendations: Vec::new(),
            confidence: 0.0,
        };
        explanations.recommendations = recommendations(case, &explanations);
        explanations.confidence = explanations.compute_confidence();
        tracing::debug!(
            case = %case.id,
            confidence = explanations.confidence,
            "explanations generated"
        );
        explanations
    }
}

fn explain_steps(case: &TestCase) -> String {
    let steps = &case.test_steps;
    if steps.is_empty() {
        return "无测试步骤需要解释。".into();
    }
    let mut parts = Vec::new();

    let mut counts: IndexMap<StepType, usize> = IndexMap::new();
    for step in steps {
        *counts.entry(step.step_type).or_default() += 1;
    }
    let distribution: Vec<String> = counts
        .iter()
        .map(|(kind, n)| format!("{n}个{}步骤", kind.display_name()))
        .collect();
    parts.push(format!("测试包含{}。", distribution.join("，")));

    if steps.len() >= 3 {
        let head: Vec<&str> = steps.iter().take(3).map(|s| s.step_type.display_name()).collect();
        parts.push(format!("步骤顺序遵循 {} 模式，确保测试的完整性。", head.join("->")));
    }

    let key_steps: Vec<String> = steps
        .iter()
        .filter_map(|s| match s.step_type {
            StepType::Stimulus if !s.action.is_empty() => {
                Some(format!("激励步骤 '{}...'", prefix(&s.action, 30)))
            }
            StepType::Verification if s.data.contains_key("constraint_source") => {
                Some(format!("约束验证步骤{}", s.step_number))
            }
            _ => None,
        })
        .collect();
    if !key_steps.is_empty() {
        parts.push(format!("关键步骤包括: {}。", key_steps.join(", ")));
    }

    if !case.preconditions.is_empty() {
        let summary: Vec<String> = case.preconditions.iter().take(2).map(|p| prefix(p, 20)).collect();
        parts.push(format!("基于前置条件 '{}...' 设计测试步骤。", summary.join(", ")));
    }
    parts.join(" ")
}

fn explain_data(case: &TestCase) -> String {
    if case.test_data.is_empty() {
        return "无特定测试数据需要解释。".into();
    }
    let mut parts = Vec::new();

    if let Some(table) = case.test_data.get("boundary_values").and_then(|v| v.as_object()) {
        for (quantity, info) in table {
            if let Some(values) = info.get("values").and_then(|v| v.as_array()).filter(|v| !v.is_empty()) {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                parts.push(format!(
                    "{quantity}边界值选择 [{}]，覆盖正常和极限工况。",
                    rendered.join(", ")
                ));
            }
        }
    }
    if let Some(inputs) = case.test_data.get("input_data").and_then(|v| v.as_object()).filter(|m| !m.is_empty()) {
        parts.push(format!(
            "测试数据分布在 {} 个步骤中，确保每个关键操作都有数据支持。",
            inputs.len()
        ));
    }
    if case.test_patterns.contains(&TestPattern::Boundary) {
        parts.push("采用边界值分析法，选择参数的上下限进行测试。".into());
    }
    if case.test_patterns.contains(&TestPattern::FaultInjection) {
        parts.push("包含故障模式数据，验证系统的容错能力。".into());
    }
    if parts.is_empty() {
        parts.push("测试数据基于被测系统的规格和典型使用场景选择，确保测试的代表性和有效性。".into());
    }
    parts.join(" ")
}

fn explain_constraints(case: &TestCase) -> String {
    if case.constraints.is_empty() {
        return "无特定约束需要处理。".into();
    }
    let mut parts = Vec::new();

    let mut counts: IndexMap<&'static str, usize> = IndexMap::new();
    for c in &case.constraints {
        *counts.entry(c.kind.display_name()).or_default() += 1;
    }
    let distribution: Vec<String> = counts.iter().map(|(k, n)| format!("{n}个{k}约束")).collect();
    parts.push(format!("测试需要处理 {}。", distribution.join("，")));

    let verifying: Vec<String> = case
        .steps_of(StepType::Verification)
        .filter(|s| s.data.contains_key("constraint_source") || s.data.contains_key("constraint_type"))
        .take(3)
        .map(|s| format!("步骤{}", s.step_number))
        .collect();
    if !verifying.is_empty() {
        parts.push(format!("通过 {} 等步骤验证关键约束。", verifying.join("、")));
    }

    let high: Vec<String> = case
        .constraints
        .iter()
        .filter(|c| c.priority == ConstraintPriority::High && !c.content.is_empty())
        .map(|c| format!("'{}...'", prefix(&c.content, 50)))
        .collect();
    if !high.is_empty() {
        parts.push(format!("高优先级约束 {} 得到重点验证。", high.join(", ")));
    }
    parts.join(" ")
}

fn explain_design(case: &TestCase, classification: &ClassificationResult) -> String {
    let mut decisions: Vec<&str> = Vec::new();

    if case.test_steps.len() >= 3 && case.test_steps[0].step_type == StepType::Setup {
        decisions.push("采用先设置环境、再施加激励、最后验证响应的标准测试流程。");
    }
    if case.test_data.contains_key("boundary_values") {
        decisions.push("包含边界值测试数据，确保系统在极限条件下的可靠性。");
    }
    if classification.domain == Domain::HilTesting {
        decisions.push("针对HIL测试环境，设计实时性验证和故障注入场景。");
    }
    if classification.subsystem == Subsystem::Vcu {
        decisions.push("针对VCU控制器的模式管理特性，设计状态转换测试。");
    }
    if case.standards.iter().any(|s| s.eq_ignore_ascii_case("ISO 26262")) {
        decisions.push("遵循ISO 26262安全标准，设计故障注入和安全机制验证。");
    }
    if decisions.is_empty() {
        decisions.push("基于最佳实践和经验设计测试用例，确保测试的有效性和可重复性。");
    }
    tracing::trace!(domain = classification.domain.label(), "design decisions collected");
    decisions.join(" ")
}

fn recommendations(case: &TestCase, explanations: &Explanations) -> Vec<String> {
    let mut out = Vec::new();
    if case.test_steps.len() < 5 {
        out.push("建议增加测试步骤，覆盖更多测试场景。".to_string());
    }
    let has_data = |key: &str| {
        case.test_data
            .get(key)
            .is_some_and(|v| v.as_object().is_some_and(|m| !m.is_empty()))
    };
    if !has_data("boundary_values") && !has_data("input_data") {
        out.push("建议补充测试数据，特别是边界值和异常数据。".to_string());
    }
    if case.constraints.len() > 5 {
        out.push("约束数量较多，建议分组验证以提高测试效率。".to_string());
    }
    if !explanations.steps.is_empty() && explanations.steps.chars().count() < 100 {
        out.push("步骤解释可以更详细，说明每个步骤的设计意图。".to_string());
    }
    out.truncate(MAX_RECOMMENDATIONS);
    out
}
