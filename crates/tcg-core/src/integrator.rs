//! Constraint integration and coverage
//!
//! Each constraint is matched against the rules for its type; the first
//! matching rule produces one verification step. The step goes after the
//! last verification step, else after the last stimulus step, else at the
//! end, and the sequence is then renumbered in canonical order. Constraints
//! no rule matches are left for coverage reporting to expose.

use crate::model::{Constraint, ConstraintType, DataMap, StepType, TestCase, TestStep};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Constraints considered by coverage
pub const COVERAGE_CONSTRAINT_LIMIT: usize = 10;
/// Inserted verification step timeout, milliseconds
const VERIFICATION_TIMEOUT_MS: u64 = 5000;

struct MappingRule {
    pattern: Regex,
    action: &'static str,
    verification: &'static str,
}

fn rule(pattern: &str, action: &'static str, verification: &'static str) -> MappingRule {
    MappingRule {
        pattern: Regex::new(&format!("(?i){pattern}")).expect("valid mapping pattern"),
        action,
        verification,
    }
}

static RULES: Lazy<Vec<(ConstraintType, Vec<MappingRule>)>> = Lazy::new(|| {
    vec![
        (
            ConstraintType::Performance,
            vec![
                rule(r"响应时间.*?([<=≥≤].*?\d+.*?(ms|s))", "添加时间测量步骤", "时间测量"),
                rule(r"吞吐量.*?([>=≤≥].*?\d+)", "添加吞吐量测试步骤", "数据量统计"),
            ],
        ),
        (
            ConstraintType::Safety,
            vec![
                rule(r"安全.*?要求", "添加安全机制验证", "安全状态检查"),
                rule(r"故障.*?检测", "添加故障注入步骤", "故障响应验证"),
            ],
        ),
        (
            ConstraintType::Reliability,
            vec![rule(r"MTBF.*?([>=≤≥].*?\d+)", "添加耐久性测试循环", "失效统计")],
        ),
        (
            ConstraintType::Environmental,
            vec![
                rule(r"温度.*?([-~].*?\d+.*?[°度]C)", "添加温度变化测试", "温度监控"),
                rule(r"防护等级.*?(IP\d+)", "添加防护性能测试", "防护等级检查"),
            ],
        ),
        (
            ConstraintType::Compliance,
            vec![
                rule(r"故障注入", "添加故障注入步骤", "故障响应验证"),
                rule(r"安全机制|安全状态", "添加安全机制验证", "安全状态检查"),
                rule(r"(ISO|GB/?T?)\s*\d+", "添加标准符合性验证", "标准条款核查"),
            ],
        ),
    ]
});

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number pattern"));
static UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(ms|m/s|Hz|%|s)").expect("valid unit pattern"));
static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s*[~-]\s*(-?\d+(?:\.\d+)?)").expect("valid range pattern")
});
static ASIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ASIL[-\s]?[ABCD]").expect("valid ASIL pattern"));

fn rules_for(kind: ConstraintType) -> &'static [MappingRule] {
    RULES
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or(&[], |(_, rules)| rules.as_slice())
}

/// Verification method and tooling per constraint type
#[must_use]
pub fn verification_details(kind: ConstraintType) -> Option<Value> {
    let (verification_type, methods, tools): (&str, [&str; 3], [&str; 3]) = match kind {
        ConstraintType::Performance => (
            "数值验证",
            ["范围检查", "阈值比较", "趋势分析"],
            ["示波器", "数据采集卡", "分析软件"],
        ),
        ConstraintType::Safety => (
            "状态验证",
            ["状态机检查", "故障码读取", "安全状态确认"],
            ["诊断仪", "安全分析工具", "监控软件"],
        ),
        ConstraintType::Reliability => (
            "统计验证",
            ["MTBF计算", "失效率统计", "寿命分析"],
            ["可靠性分析软件", "数据记录仪", "统计分析工具"],
        ),
        _ => return None,
    };
    Some(json!({"verification_type": verification_type, "methods": methods, "tools": tools}))
}

/// Numbers, ranges or ASIL level found in a constraint
#[must_use]
pub fn extract_constraint_info(content: &str, kind: ConstraintType) -> DataMap {
    let mut info = DataMap::new();
    match kind {
        ConstraintType::Performance => {
            let mut numbers = NUMBER.find_iter(content).map(|m| m.as_str());
            if let Some(value) = numbers.next() {
                info.insert("value".into(), json!(value));
            }
            if let Some(threshold) = numbers.next() {
                info.insert("threshold".into(), json!(threshold));
            }
            if let Some(unit) = UNIT.find(content) {
                info.insert("unit".into(), json!(unit.as_str()));
            }
        }
        ConstraintType::Environmental => {
            if let Some(caps) = RANGE.captures(content) {
                info.insert("min_value".into(), json!(&caps[1]));
                info.insert("max_value".into(), json!(&caps[2]));
            }
        }
        ConstraintType::Safety => {
            if let Some(m) = ASIL.find(content) {
                info.insert("asil_level".into(), json!(m.as_str()));
            }
        }
        _ => {}
    }
    info
}

fn prefix(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Verification step synthesized for a constraint, `None` when no rule matches
#[must_use]
pub fn verification_step_for(constraint: &Constraint) -> Option<TestStep> {
    let rule = rules_for(constraint.kind)
        .iter()
        .find(|r| r.pattern.is_match(&constraint.content))?;

    let mut action = format!("{}: {}", rule.action, prefix(&constraint.content, 50));
    if let Some(standard) = &constraint.standard_reference {
        action.push_str(&format!("（{standard}）"));
    }

    let mut data = DataMap::new();
    data.insert("constraint_source".into(), json!(constraint.content));
    data.insert("constraint_type".into(), json!(constraint.kind.as_str()));
    if let Some(details) = verification_details(constraint.kind) {
        data.insert("verification_details".into(), details);
    }
    data.insert(
        "extracted_info".into(),
        Value::Object(extract_constraint_info(&constraint.content, constraint.kind)),
    );
    if let Some(standard) = &constraint.standard_reference {
        data.insert("standard_reference".into(), json!(standard));
    }

    let suffix = Uuid::new_v4().simple().to_string();
    Some(
        TestStep::new(
            format!("{CONSTRAINT_STEP_PREFIX}{:03}_{}", 0, &suffix[..8]),
            StepType::Verification,
            action,
        )
            .with_description(format!("验证约束: {}...", prefix(&constraint.content, 30)))
            .with_data(data)
            .with_expected_result(format!("满足约束条件: {}", prefix(&constraint.content, 50)))
            .with_verification_method(rule.verification)
            .with_timeout(VERIFICATION_TIMEOUT_MS),
    )
}

/// Id prefix of steps inserted by [`ConstraintIntegrator`]
pub const CONSTRAINT_STEP_PREFIX: &str = "VERIFY_";

/// Whether `step` was inserted to verify a constraint
#[inline]
#[must_use]
pub fn is_constraint_step(step: &TestStep) -> bool {
    step.id.starts_with(CONSTRAINT_STEP_PREFIX)
}

/// Whether some step already verifies `constraint`
fn already_verified(steps: &[TestStep], constraint: &Constraint) -> bool {
    steps.iter().any(|s| {
        s.data
            .get("constraint_source")
            .and_then(Value::as_str)
            .is_some_and(|src| src == constraint.content)
    })
}

/// Where a new verification step goes
fn insertion_index(steps: &[TestStep]) -> usize {
    let last = |kind: StepType| steps.iter().rposition(|s| s.step_type == kind);
    last(StepType::Verification)
        .or_else(|| last(StepType::Stimulus))
        .map_or(steps.len(), |i| i + 1)
}

/// Inserts constraint verification steps into test cases
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintIntegrator;

impl ConstraintIntegrator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Insert one verification step per matching constraint that no step
    /// verifies yet; returns the count
    pub fn integrate(&self, case: &mut TestCase, constraints: &[Constraint]) -> usize {
        if constraints.is_empty() {
            tracing::debug!("no constraints to integrate");
            return 0;
        }
        let mut inserted = 0;
        for constraint in constraints {
            if already_verified(&case.test_steps, constraint) {
                tracing::debug!(constraint = %constraint.id, "already verified");
                continue;
            }
            let Some(mut step) = verification_step_for(constraint) else {
                tracing::debug!(constraint = %constraint.id, "no mapping rule");
                continue;
            };
            let at = insertion_index(&case.test_steps);
            step.id = step.id.replacen(
                &format!("{CONSTRAINT_STEP_PREFIX}000"),
                &format!("{CONSTRAINT_STEP_PREFIX}{:03}", at + 1),
                1,
            );
            case.test_steps.insert(at, step);
            inserted += 1;
        }
        case.normalize_steps();
        tracing::info!(inserted, steps = case.test_steps.len(), "constraints integrated");
        inserted
    }
}

/// Lexical coverage of constraints by a step sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintCoverage {
    pub total_coverage: f64,
    pub by_type: IndexMap<String, f64>,
    pub considered: usize,
    pub covered: usize,
}

/// First three whitespace tokens longer than two characters
fn leading_keywords(content: &str) -> Vec<String> {
    content
        .to_lowercase()
        .split_whitespace()
        .take(3)
        .filter(|t| t.chars().count() > 2)
        .map(ToString::to_string)
        .collect()
}

/// Whether any leading keyword of `constraint` occurs in `steps_text`
#[must_use]
pub fn is_covered(constraint: &Constraint, steps_text: &str) -> bool {
    leading_keywords(&constraint.content)
        .iter()
        .any(|k| steps_text.contains(k.as_str()))
}

/// Coverage over the first [`COVERAGE_CONSTRAINT_LIMIT`] constraints;
/// 1.0 when there are none
#[must_use]
pub fn constraint_coverage(case: &TestCase, constraints: &[Constraint]) -> ConstraintCoverage {
    let considered: Vec<&Constraint> = constraints.iter().take(COVERAGE_CONSTRAINT_LIMIT).collect();
    if considered.is_empty() {
        return ConstraintCoverage {
            total_coverage: 1.0,
            by_type: IndexMap::new(),
            considered: 0,
            covered: 0,
        };
    }

    let text = case.steps_text();
    let mut per_type: IndexMap<String, (usize, usize)> = IndexMap::new();
    let mut covered = 0;
    for c in &considered {
        let hit = is_covered(c, &text);
        let entry = per_type.entry(c.kind.as_str().to_string()).or_default();
        entry.0 += 1;
        if hit {
            entry.1 += 1;
            covered += 1;
        }
    }
    ConstraintCoverage {
        total_coverage: covered as f64 / considered.len() as f64,
        by_type: per_type
            .into_iter()
            .map(|(k, (n, hit))| (k, hit as f64 / n as f64))
            .collect(),
        considered: considered.len(),
        covered,
    }
}

/// One verification step as a checklist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationPoint {
    pub step_number: usize,
    pub description: String,
    pub verification_method: String,
    pub constraint_reference: String,
    pub expected_result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub points: Vec<VerificationPoint>,
    /// Constraint-derived verification steps per constraint type
    pub counts_by_type: IndexMap<String, usize>,
    pub coverage: ConstraintCoverage,
}

#[must_use]
pub fn verification_summary(case: &TestCase, constraints: &[Constraint]) -> VerificationSummary {
    let mut counts_by_type: IndexMap<String, usize> = IndexMap::new();
    let points = case
        .steps_of(StepType::Verification)
        .map(|s| {
            if let Some(kind) = s.data.get("constraint_type").and_then(Value::as_str) {
                *counts_by_type.entry(kind.to_string()).or_default() += 1;
            }
            VerificationPoint {
                step_number: s.step_number,
                description: s.description.clone(),
                verification_method: s.verification_method.clone(),
                constraint_reference: s
                    .data
                    .get("constraint_source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                expected_result: s.expected_result.clone(),
            }
        })
        .collect();
    VerificationSummary {
        points,
        counts_by_type,
        coverage: constraint_coverage(case, constraints),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{is_canonical_order, ConstraintPriority};
    use crate::taxonomy::{Domain, Subsystem, TestPattern};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn case(kinds: &[StepType]) -> TestCase {
        let mut steps: Vec<TestStep> = kinds
            .iter()
            .enumerate()
            .map(|(i, k)| TestStep::new(format!("S{i}"), *k, format!("{}步骤", k.display_name())))
            .collect();
        crate::model::renumber_steps(&mut steps);
        TestCase {
            id: "TC".into(),
            name: "n".into(),
            description: String::new(),
            domain: Domain::HilTesting,
            subsystem: Subsystem::Vcu,
            test_patterns: vec![TestPattern::Functional],
            preconditions: vec![],
            test_steps: steps,
            expected_results: vec![],
            pass_criteria: String::new(),
            test_data: DataMap::new(),
            constraints: vec![],
            standards: vec![],
            metadata: DataMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn constraint(content: &str, kind: ConstraintType) -> Constraint {
        Constraint::new("C001", content, kind, "用户需求").with_priority(ConstraintPriority::High)
    }

    #[test]
    fn inserts_after_last_verification() {
        use StepType::*;
        let mut tc = case(&[Setup, Stimulus, Verification, Record, Cleanup]);
        let n = ConstraintIntegrator::new().integrate(
            &mut tc,
            &[constraint("响应时间<=100ms", ConstraintType::Performance)],
        );
        assert_eq!(n, 1);
        assert_eq!(tc.test_steps[3].step_type, Verification);
        assert!(tc.test_steps[3].action.starts_with("添加时间测量步骤: 响应时间<=100ms"));
        assert_eq!(tc.test_steps[3].step_number, 4);
        assert!(tc.test_steps[3].id.starts_with("VERIFY_004_"));
        assert!(is_canonical_order(&tc.test_steps));
    }

    #[test]
    fn reintegrating_the_same_constraints_adds_nothing() {
        use StepType::*;
        let mut tc = case(&[Setup, Stimulus, Verification, Cleanup]);
        let constraints = [
            constraint("响应时间<=100ms", ConstraintType::Performance),
            constraint("必须进行故障注入测试", ConstraintType::Compliance).with_standard("ISO 26262"),
        ];
        let integrator = ConstraintIntegrator::new();

        assert_eq!(integrator.integrate(&mut tc, &constraints), 2);
        let steps = tc.test_steps.len();
        assert_eq!(integrator.integrate(&mut tc, &constraints), 0);
        assert_eq!(tc.test_steps.len(), steps);
        assert_eq!(tc.test_steps.iter().filter(|s| is_constraint_step(s)).count(), 2);
    }

    #[test]
    fn inserts_after_last_stimulus_without_verification() {
        use StepType::*;
        let mut tc = case(&[Setup, Stimulus, Stimulus, Record, Cleanup]);
        ConstraintIntegrator::new().integrate(&mut tc, &[constraint("需要符合安全要求", ConstraintType::Safety)]);
        assert_eq!(tc.test_steps[3].step_type, Verification);
        assert_eq!(tc.test_steps[4].step_type, Record);
    }

    #[test]
    fn appended_steps_never_follow_cleanup() {
        use StepType::*;
        let mut tc = case(&[Setup, Cleanup]);
        ConstraintIntegrator::new().integrate(&mut tc, &[constraint("MTBF>=10000h", ConstraintType::Reliability)]);
        let kinds: Vec<StepType> = tc.test_steps.iter().map(|s| s.step_type).collect();
        assert_eq!(kinds, vec![Setup, Verification, Cleanup]);
    }

    #[test]
    fn unmatched_constraints_are_skipped() {
        use StepType::*;
        let mut tc = case(&[Setup, Verification]);
        let n = ConstraintIntegrator::new().integrate(
            &mut tc,
            &[constraint("外观整洁", ConstraintType::Other), constraint("吞吐量不限", ConstraintType::Performance)],
        );
        assert_eq!(n, 0);
        assert_eq!(tc.test_steps.len(), 2);
    }

    #[test]
    fn compliance_step_carries_standard() {
        let c = constraint("必须进行故障注入测试", ConstraintType::Compliance).with_standard("ISO 26262");
        let step = verification_step_for(&c).unwrap();
        assert_eq!(step.action, "添加故障注入步骤: 必须进行故障注入测试（ISO 26262）");
        assert_eq!(step.verification_method, "故障响应验证");
        assert_eq!(step.data["standard_reference"], "ISO 26262");
        assert!(step.data.get("verification_details").is_none());
    }

    #[test]
    fn extracts_numbers_ranges_and_asil() {
        let perf = extract_constraint_info("响应时间<=100ms，超时200ms", ConstraintType::Performance);
        assert_eq!(perf["value"], "100");
        assert_eq!(perf["threshold"], "200");
        assert_eq!(perf["unit"], "ms");
        let env = extract_constraint_info("温度范围-40~85°C", ConstraintType::Environmental);
        assert_eq!(env["min_value"], "-40");
        assert_eq!(env["max_value"], "85");
        let safety = extract_constraint_info("满足asil c安全要求", ConstraintType::Safety);
        assert_eq!(safety["asil_level"], "asil c");
    }

    #[test]
    fn coverage_is_one_without_constraints() {
        let tc = case(&[StepType::Setup]);
        assert_eq!(constraint_coverage(&tc, &[]).total_coverage, 1.0);
    }

    #[test]
    fn coverage_caps_considered_constraints() {
        let tc = case(&[StepType::Setup]);
        let many: Vec<Constraint> = (0..15)
            .map(|i| constraint(&format!("约束内容{i}"), ConstraintType::Other))
            .collect();
        let cov = constraint_coverage(&tc, &many);
        assert_eq!(cov.considered, COVERAGE_CONSTRAINT_LIMIT);
        assert_eq!(cov.total_coverage, 0.0);
    }

    #[test]
    fn integrated_constraints_are_covered() {
        use StepType::*;
        let mut tc = case(&[Setup, Stimulus, Verification, Cleanup]);
        let constraints = vec![
            constraint("响应时间<=100ms", ConstraintType::Performance),
            constraint("外观整洁无划痕", ConstraintType::Other),
        ];
        ConstraintIntegrator::new().integrate(&mut tc, &constraints);
        let summary = verification_summary(&tc, &constraints);
        assert_eq!(summary.coverage.total_coverage, 0.5);
        assert_eq!(summary.coverage.by_type["performance"], 1.0);
        assert_eq!(summary.coverage.by_type["other"], 0.0);
        assert_eq!(summary.counts_by_type["performance"], 1);
        assert_eq!(summary.points.len(), 2);
    }

    proptest! {
        #[test]
        fn adding_a_matching_step_never_lowers_coverage(word in "[a-z]{3,8}") {
            use StepType::*;
            let mut tc = case(&[Setup, Verification, Cleanup]);
            let c = constraint(&format!("{word} 延时 检查"), ConstraintType::Other);
            let before = constraint_coverage(&tc, std::slice::from_ref(&c)).total_coverage;
            tc.test_steps.insert(2, TestStep::new("X", Verification, format!("verify {word}")));
            tc.normalize_steps();
            let after = constraint_coverage(&tc, std::slice::from_ref(&c)).total_coverage;
            prop_assert!(after >= before);
            prop_assert_eq!(after, 1.0);
        }
    }
}
