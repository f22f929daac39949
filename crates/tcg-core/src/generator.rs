//! Test case generation
//!
//! Steps come from one of three sources, in order of preference:
//! - the selected template, with `{placeholder}` tokens filled from context
//! - a step plan proposed by the inference service, validated step by step
//!   and held to 6-10 steps
//! - a fixed six-step plan
//!
//! Step data is always synthesized locally from [`crate::test_data`], and
//! the final sequence is put into canonical order (setup, body, cleanup).

use crate::extractor::SpecAnalysis;
use crate::model::{order_steps, ClassificationResult, DataMap, StepType, TestCase, TestStep};
use crate::taxonomy::{Domain, Label, TestPattern};
use crate::templates::{CaseTemplate, StepTemplate};
use crate::test_data::{
    boundary_table, can_id, infer_fault_type, infer_signal_type, monitoring_points, Quantity,
    CAN_ID_RANGE,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tcg_inference::InferenceClient;
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "你是一名资深汽车HIL测试工程师。只返回要求的内容，不要附加解释。";
const MIN_STEPS: usize = 6;
const MAX_STEPS: usize = 10;
const MAX_EXPECTED_RESULTS: usize = 10;
/// Stand-in for placeholders nothing could fill
const UNRESOLVED_VALUE: &str = "具体值";
const DEFAULT_STEP_TIMEOUT_MS: u64 = 1000;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid placeholder pattern"));

/// How the steps of a case were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMethod {
    TemplateBased,
    AiGenerated,
    Default,
}

impl GenerationMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemplateBased => "template_based",
            Self::AiGenerated => "ai_generated",
            Self::Default => "default",
        }
    }
}

fn step_id(step_number: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("STEP_{step_number:03}_{}", &suffix[..8])
}

fn data_map(value: Value) -> DataMap {
    match value {
        Value::Object(map) => map,
        _ => DataMap::new(),
    }
}

fn normal_environment() -> Value {
    json!({
        "temperature": Quantity::Temperature.normal_value(),
        "voltage": Quantity::Voltage.normal_value(),
    })
}

/// Default data for a step, derived only from its type, action and position
#[must_use]
pub fn step_data(step_type: StepType, step_number: usize, action: &str) -> DataMap {
    let duration = Quantity::Time.normal_value();
    let value = match step_type {
        StepType::Setup => json!({
            "environment": normal_environment(),
            "initial_state": "准备就绪",
        }),
        StepType::Stimulus => {
            let is_signal = action.contains("信号") || action.contains("发送");
            let is_fault = action.contains("故障") || action.contains("注入");
            if is_fault && !is_signal {
                json!({
                    "fault_type": infer_fault_type(action),
                    "injection_method": "软件注入",
                    "duration": duration,
                })
            } else {
                let signal = infer_signal_type(action);
                let mut data = json!({
                    "signal_type": signal,
                    "signal_value": Quantity::Voltage.boundary_value(step_number),
                    "duration": duration,
                });
                if signal == "CAN信号" {
                    data["can_id"] = json!(can_id(step_number));
                }
                data
            }
        }
        StepType::Verification => json!({
            "monitoring_points": monitoring_points(action),
            "sampling_rate": 100,
            "duration": duration,
        }),
        StepType::Delay => json!({
            "duration": duration,
            "reason": "等待系统稳定",
        }),
        StepType::Record => json!({
            "data_points": ["响应时间", "状态值", "错误码"],
            "storage_format": "CSV",
            "sample_count": 100,
        }),
        StepType::Cleanup => json!({
            "restore_state": "初始状态",
            "environment": normal_environment(),
        }),
    };
    data_map(value)
}

/// Expected result phrase for a step
#[must_use]
pub fn step_expected_result(step_type: StepType, action: &str, subsystem_label: &str) -> String {
    match step_type {
        StepType::Setup => format!("测试环境准备就绪，{subsystem_label}处于初始状态"),
        StepType::Stimulus => format!("成功{action}，系统接收到激励信号"),
        StepType::Verification => "系统响应符合预期，性能指标在允许范围内".to_string(),
        StepType::Delay => "等待时间结束，系统达到稳定状态".to_string(),
        StepType::Record => "测试数据完整记录，数据格式正确".to_string(),
        StepType::Cleanup => "测试环境恢复完成，系统状态正常".to_string(),
    }
}

/// Builds test cases from classification, analysis and an optional template
pub struct CaseGenerator {
    ai: Option<Arc<InferenceClient>>,
}

impl std::fmt::Debug for CaseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseGenerator")
            .field("ai_enabled", &self.ai.is_some())
            .finish()
    }
}

impl CaseGenerator {
    #[must_use]
    pub fn new(ai: Option<Arc<InferenceClient>>) -> Self {
        Self { ai }
    }

    /// Generate a test case
    pub async fn generate(
        &self,
        requirement: &str,
        classification: &ClassificationResult,
        analysis: &SpecAnalysis,
        template: Option<&CaseTemplate>,
    ) -> TestCase {
        tracing::info!(template = template.map(|t| t.id.as_str()), "generating test case");

        let (mut steps, method) = match template.filter(|t| !t.step_templates.is_empty()) {
            Some(t) => (
                self.steps_from_template(t, requirement, classification).await,
                GenerationMethod::TemplateBased,
            ),
            None => match self.steps_from_service(requirement, classification).await {
                Some(steps) => (steps, GenerationMethod::AiGenerated),
                None => (default_steps(classification), GenerationMethod::Default),
            },
        };
        order_steps(&mut steps);

        let test_data = build_test_data(requirement, classification, &steps);
        let preconditions = preconditions(classification);
        let expected_results = expected_results(classification, &steps);
        let pass_criteria = pass_criteria(classification, !expected_results.is_empty());

        let now = Utc::now();
        let mut metadata = DataMap::new();
        metadata.insert("generation_method".into(), json!(method.as_str()));
        metadata.insert("template_used".into(), json!(template.map(|t| t.id.clone())));
        metadata.insert("classification_confidence".into(), json!(classification.confidence));
        metadata.insert("spec_analysis_quality".into(), json!(analysis.quality_score));
        metadata.insert("step_count".into(), json!(steps.len()));
        metadata.insert("constraint_count".into(), json!(analysis.constraints.len()));

        let case = TestCase {
            id: format!("TC_{}_{}", classification.subsystem.code(), now.format("%Y%m%d_%H%M%S")),
            name: format!(
                "{} {}",
                classification.subsystem.short_name(),
                classification.primary_pattern().label()
            ),
            description: requirement.to_string(),
            domain: classification.domain,
            subsystem: classification.subsystem,
            test_patterns: classification.test_patterns.clone(),
            preconditions,
            test_steps: steps,
            expected_results,
            pass_criteria,
            test_data,
            constraints: analysis.constraints.clone(),
            standards: classification.standards.clone(),
            metadata,
            created_at: now,
            updated_at: now,
        };
        tracing::info!(case = %case.id, steps = case.test_steps.len(), method = method.as_str(), "test case generated");
        case
    }

    async fn steps_from_template(
        &self,
        template: &CaseTemplate,
        requirement: &str,
        classification: &ClassificationResult,
    ) -> Vec<TestStep> {
        let total = template.step_templates.len();
        let mut steps = Vec::with_capacity(total.min(MAX_STEPS));
        for (i, st) in template.step_templates.iter().take(MAX_STEPS).enumerate() {
            let number = i + 1;
            let context = placeholder_context(requirement, classification, number, total);
            let action = self.fill_placeholders(&st.action_template, &context).await;
            steps.push(instantiate(st, number, action, classification));
        }
        steps
    }

    /// Replace `{name}` tokens from `context`; leftovers go to the inference
    /// service, then to a fixed stand-in
    pub async fn fill_placeholders(&self, template: &str, context: &HashMap<&'static str, String>) -> String {
        let filled = PLACEHOLDER
            .replace_all(template, |caps: &regex::Captures<'_>| {
                context
                    .get(caps[1].trim())
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
        if !PLACEHOLDER.is_match(&filled) {
            return filled;
        }

        if let Some(ai) = &self.ai {
            let ctx = serde_json::to_string_pretty(context).unwrap_or_default();
            let prompt = format!(
                "请根据以下上下文信息，填充模板中的变量：\n\n模板：{filled}\n\n上下文信息：\n{ctx}\n\n\
                 请将模板中用{{}}括起的变量替换为具体、合理的值，只返回填充后的完整文本。"
            );
            match ai.complete(SYSTEM_PROMPT, &prompt).await {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() && !text.contains(['{', '}']) && text.chars().count() <= 200 {
                        return text.to_string();
                    }
                    tracing::warn!("placeholder fill reply rejected");
                }
                Err(e) => tracing::warn!(error = %e, "placeholder fill failed"),
            }
        }
        PLACEHOLDER.replace_all(&filled, UNRESOLVED_VALUE).into_owned()
    }

    async fn steps_from_service(
        &self,
        requirement: &str,
        classification: &ClassificationResult,
    ) -> Option<Vec<TestStep>> {
        let ai = self.ai.as_ref()?;
        let patterns: Vec<&str> = classification.test_patterns.iter().map(|p| p.label()).collect();
        let prompt = format!(
            "请为以下测试需求生成详细的测试步骤序列：\n\n测试需求：{requirement}\n\n测试上下文：\n\
             - 测试领域：{}\n- 目标系统：{}\n- 测试模式：{}\n- 相关标准：{}\n- 约束条件：{}\n\n\
             请生成6-10个具体的测试步骤。以JSON数组格式返回，每个元素为：\n\
             {{\"step_number\": 1, \"action\": \"具体操作描述\", \
             \"step_type\": \"setup|stimulus|verification|delay|record|cleanup\", \"data\": {{}}, \
             \"expected_result\": \"预期结果\", \"verification_method\": \"验证方法\", \"timeout\": 1000}}",
            classification.domain,
            classification.subsystem,
            patterns.join(", "),
            classification.standards.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
            classification.constraints.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
        );

        let items = match ai.complete_json::<Vec<Value>>(SYSTEM_PROMPT, &prompt).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "step planning unavailable, using default plan");
                return None;
            }
        };
        let mut steps = Vec::with_capacity(MAX_STEPS);
        let mut rejected = 0usize;
        for item in &items {
            if steps.len() == MAX_STEPS {
                break;
            }
            match step_from_reply(item, steps.len() + 1, classification) {
                Some(step) => steps.push(step),
                None => rejected += 1,
            }
        }
        if rejected > 0 {
            tracing::warn!(rejected, "dropped invalid planned steps");
        }
        if items.len() > steps.len() + rejected {
            tracing::debug!(kept = MAX_STEPS, offered = items.len(), "truncated planned steps");
        }
        if steps.is_empty() {
            return None;
        }
        pad_with_defaults(&mut steps, classification);
        Some(steps)
    }
}

/// Top up a short plan with default steps it does not already contain
fn pad_with_defaults(steps: &mut Vec<TestStep>, classification: &ClassificationResult) {
    if steps.len() >= MIN_STEPS {
        return;
    }
    let missing = MIN_STEPS - steps.len();
    let fillers: Vec<TestStep> = default_steps(classification)
        .into_iter()
        .filter(|d| !steps.iter().any(|s| s.action == d.action))
        .take(missing)
        .collect();
    tracing::debug!(planned = steps.len(), added = fillers.len(), "padding short step plan");
    for mut step in fillers {
        let number = steps.len() + 1;
        step.id = step_id(number);
        step.step_number = number;
        step.data = step_data(step.step_type, number, &step.action);
        step.description = format!("步骤{number}");
        steps.push(step);
    }
}

fn placeholder_context(
    requirement: &str,
    classification: &ClassificationResult,
    step_number: usize,
    total_steps: usize,
) -> HashMap<&'static str, String> {
    let patterns: Vec<&str> = classification.test_patterns.iter().map(|p| p.label()).collect();
    HashMap::from([
        ("requirement", requirement.to_string()),
        ("domain", classification.domain.label().to_string()),
        ("subsystem", classification.subsystem.label().to_string()),
        ("controller", classification.subsystem.short_name().to_string()),
        ("test_patterns", patterns.join(", ")),
        ("signal", infer_signal_type(requirement).trim_end_matches("信号").to_string()),
        ("fault_type", infer_fault_type(requirement).trim_end_matches("故障").to_string()),
        ("step_number", step_number.to_string()),
        ("total_steps", total_steps.to_string()),
    ])
}

fn instantiate(
    template: &StepTemplate,
    number: usize,
    action: String,
    classification: &ClassificationResult,
) -> TestStep {
    let expected = step_expected_result(template.step_type, &action, classification.subsystem.label());
    let data = step_data(template.step_type, number, &action);
    let mut step = TestStep::new(step_id(number), template.step_type, action)
        .with_data(data)
        .with_expected_result(expected)
        .with_verification_method(template.verification_method.clone())
        .with_description(
            template
                .description
                .clone()
                .unwrap_or_else(|| format!("步骤{number}")),
        );
    step.step_number = number;
    step.timeout = template.timeout;
    step
}

/// Planned step at position `number`; `None` when required fields are missing or invalid
fn step_from_reply(item: &Value, number: usize, classification: &ClassificationResult) -> Option<TestStep> {
    let action = item.get("action")?.as_str()?.trim();
    if action.is_empty() {
        return None;
    }
    let step_type: StepType = item.get("step_type")?.as_str()?.parse().ok()?;
    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    let data = item
        .get("data")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .cloned()
        .unwrap_or_else(|| step_data(step_type, number, action));
    let expected = text("expected_result")
        .unwrap_or_else(|| step_expected_result(step_type, action, classification.subsystem.label()));
    let mut step = TestStep::new(step_id(number), step_type, action)
        .with_data(data)
        .with_expected_result(expected)
        .with_verification_method(text("verification_method").unwrap_or_else(|| "通用验证".to_string()));
    step.step_number = number;
    step.timeout = item.get("timeout").and_then(Value::as_u64);
    Some(step)
}

/// Fixed plan used when neither a template nor a service plan is available
#[must_use]
pub fn default_steps(classification: &ClassificationResult) -> Vec<TestStep> {
    let plan = [
        (StepType::Setup, "设置测试环境"),
        (StepType::Stimulus, "发送测试激励信号"),
        (StepType::Verification, "验证系统响应"),
        (StepType::Verification, "检查功能正确性"),
        (StepType::Record, "记录测试数据"),
        (StepType::Cleanup, "恢复测试环境"),
    ];
    plan.iter()
        .enumerate()
        .map(|(i, (kind, action))| {
            let number = i + 1;
            let mut step = TestStep::new(format!("STEP_{number:03}_DEFAULT"), *kind, *action)
                .with_data(step_data(*kind, number, action))
                .with_expected_result(step_expected_result(*kind, action, classification.subsystem.label()))
                .with_verification_method("通用验证")
                .with_timeout(DEFAULT_STEP_TIMEOUT_MS)
                .with_description(format!("步骤{number}"));
            step.step_number = number;
            step
        })
        .collect()
}

fn build_test_data(requirement: &str, classification: &ClassificationResult, steps: &[TestStep]) -> DataMap {
    let input: DataMap = steps
        .iter()
        .filter(|s| !s.data.is_empty())
        .map(|s| (format!("step_{}", s.step_number), Value::Object(s.data.clone())))
        .collect();
    data_map(json!({
        "metadata": {
            "generated_at": Utc::now().to_rfc3339(),
            "requirement": requirement.chars().take(100).collect::<String>(),
            "domain": classification.domain.label(),
            "subsystem": classification.subsystem.label(),
        },
        "input_data": input,
        "boundary_values": boundary_table(),
        "can_id_range": [format!("0x{:03X}", CAN_ID_RANGE.0), format!("0x{:03X}", CAN_ID_RANGE.1)],
    }))
}

fn push_unique(list: &mut Vec<String>, value: impl Into<String>) {
    let value = value.into();
    if !list.contains(&value) {
        list.push(value);
    }
}

fn preconditions(classification: &ClassificationResult) -> Vec<String> {
    let mut out = Vec::new();
    push_unique(&mut out, "测试环境准备就绪");
    push_unique(&mut out, format!("{}处于初始状态", classification.subsystem.label()));
    push_unique(&mut out, "测试设备连接正常");
    push_unique(&mut out, "测试软件版本正确");
    match classification.domain {
        Domain::HilTesting => {
            for p in ["HIL测试平台已启动", "仿真模型加载完成", "实时系统运行正常"] {
                push_unique(&mut out, p);
            }
        }
        Domain::VehicleElectrical => {
            for p in ["实车电源接通", "测试仪器校准完成", "环境条件符合要求"] {
                push_unique(&mut out, p);
            }
        }
        _ => {}
    }
    for c in classification.constraints.iter().take(3) {
        if c.contains("环境") || c.contains("温度") {
            push_unique(&mut out, "环境温度符合测试要求");
        } else if c.contains("电源") || c.contains("电压") {
            push_unique(&mut out, "电源系统稳定可靠");
        }
    }
    out
}

fn expected_results(classification: &ClassificationResult, steps: &[TestStep]) -> Vec<String> {
    let mut out = vec![format!("{}功能正常", classification.subsystem.label())];
    if classification.has_pattern(TestPattern::Performance) {
        push_unique(&mut out, "响应时间符合要求");
        push_unique(&mut out, "系统性能满足规格");
    }
    if classification.has_pattern(TestPattern::Safety) || classification.has_pattern(TestPattern::FaultInjection) {
        push_unique(&mut out, "安全机制正确触发");
        push_unique(&mut out, "故障处理符合预期");
        push_unique(&mut out, "系统状态安全可控");
    }
    for s in steps {
        if !s.expected_result.is_empty() {
            push_unique(&mut out, s.expected_result.clone());
        }
    }
    out.truncate(MAX_EXPECTED_RESULTS);
    out
}

fn pass_criteria(classification: &ClassificationResult, has_expected: bool) -> String {
    let mut parts = vec!["所有测试步骤执行完成".to_string()];
    if has_expected {
        parts.push("所有预期结果均满足".to_string());
    }
    for standard in classification.standards.iter().take(2) {
        match standard.as_str() {
            "ISO 26262" => parts.push("符合ISO 26262相关条款要求".to_string()),
            "ISO 21434" => parts.push("符合ISO 21434安全要求".to_string()),
            _ => {}
        }
    }
    if classification
        .constraints
        .iter()
        .take(3)
        .any(|c| c.contains("时间") || c.contains("响应"))
    {
        parts.push("时间性能满足约束要求".to_string());
    }
    parts.join("；")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::is_canonical_order;
    use crate::taxonomy::Subsystem;
    use crate::templates::builtin_templates;
    use pretty_assertions::assert_eq;
    use tcg_test_utils::{offline_client, scripted_client, ScriptedTransport, REFERENCE_REQUIREMENT};

    fn vcu_hil() -> ClassificationResult {
        ClassificationResult {
            domain: Domain::HilTesting,
            subsystem: Subsystem::Vcu,
            test_patterns: vec![TestPattern::Functional, TestPattern::Safety],
            confidence: 0.6,
            reasoning: String::new(),
            constraints: vec!["响应时间<=100ms".into()],
            standards: vec!["ISO 26262".into()],
            metadata: DataMap::new(),
        }
    }

    #[tokio::test]
    async fn template_steps_fill_placeholders_locally() {
        let transport = ScriptedTransport::new();
        let generator = CaseGenerator::new(Some(scripted_client(transport.clone())));
        let template = &builtin_templates()[0];
        let analysis = SpecAnalysis::empty(REFERENCE_REQUIREMENT);

        let case = generator
            .generate(REFERENCE_REQUIREMENT, &vcu_hil(), &analysis, Some(template))
            .await;

        assert_eq!(transport.call_count(), 0);
        assert_eq!(case.test_steps.len(), 5);
        assert_eq!(case.test_steps[0].action, "设置测试环境，初始化VCU控制器");
        assert_eq!(case.test_steps[1].action, "发送控制信号到VCU");
        assert!(is_canonical_order(&case.test_steps));
        assert!(case.test_steps.iter().all(|s| !s.data.is_empty()));
        assert_eq!(case.metadata["generation_method"], "template_based");
        assert!(case.id.starts_with("TC_VCU_"));
        assert_eq!(case.name, "VCU 功能测试");
        assert!(case.pass_criteria.contains("符合ISO 26262相关条款要求"));
        assert!(case.pass_criteria.contains("时间性能满足约束要求"));
        assert!(case.preconditions.contains(&"HIL测试平台已启动".to_string()));
    }

    #[tokio::test]
    async fn unknown_placeholders_fall_back_to_stand_in() {
        let generator = CaseGenerator::new(Some(offline_client()));
        let ctx = HashMap::from([("controller", "BMS".to_string())]);
        let out = generator.fill_placeholders("将{controller}置于{mode}模式", &ctx).await;
        assert_eq!(out, "将BMS置于具体值模式");
    }

    #[tokio::test]
    async fn service_fills_unknown_placeholders() {
        let transport = ScriptedTransport::new();
        transport.push_text("将BMS置于均衡模式");
        let generator = CaseGenerator::new(Some(scripted_client(transport)));
        let ctx = HashMap::from([("controller", "BMS".to_string())]);
        let out = generator.fill_placeholders("将{controller}置于{mode}模式", &ctx).await;
        assert_eq!(out, "将BMS置于均衡模式");
    }

    #[tokio::test]
    async fn planned_steps_with_invalid_types_are_dropped() {
        let transport = ScriptedTransport::new();
        transport.push_json(&json!([
            {"action": "清理环境", "step_type": "cleanup"},
            {"action": "上电初始化", "step_type": "setup", "expected_result": "上电完成"},
            {"action": "跳舞", "step_type": "dance"},
            {"action": "发送CAN唤醒报文", "step_type": "stimulus", "timeout": 500},
        ]));
        let generator = CaseGenerator::new(Some(scripted_client(transport)));

        let case = generator
            .generate("验证唤醒", &vcu_hil(), &SpecAnalysis::empty("验证唤醒"), None)
            .await;

        let kinds: Vec<StepType> = case.test_steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            kinds,
            vec![
                StepType::Setup,
                StepType::Setup,
                StepType::Stimulus,
                StepType::Stimulus,
                StepType::Verification,
                StepType::Cleanup,
            ]
        );
        assert_eq!(case.test_steps[0].expected_result, "上电完成");
        assert_eq!(case.test_steps[2].action, "发送CAN唤醒报文");
        assert_eq!(case.test_steps[2].timeout, Some(500));
        // third accepted reply, so third CAN example id
        assert_eq!(case.test_steps[2].data["can_id"], "0x0300");
        assert_eq!(case.metadata["generation_method"], "ai_generated");
    }

    #[tokio::test]
    async fn short_plans_are_padded_with_default_steps() {
        let transport = ScriptedTransport::new();
        transport.push_json(&json!([
            {"action": "上电初始化", "step_type": "setup"},
            {"action": "验证系统响应", "step_type": "verification"},
        ]));
        let generator = CaseGenerator::new(Some(scripted_client(transport)));

        let case = generator
            .generate("验证唤醒", &vcu_hil(), &SpecAnalysis::empty("验证唤醒"), None)
            .await;

        assert_eq!(case.test_steps.len(), 6);
        let actions: Vec<&str> = case.test_steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions.iter().filter(|a| **a == "验证系统响应").count(), 1);
        assert!(actions.contains(&"上电初始化"));
        assert!(actions.contains(&"记录测试数据"));
        assert!(is_canonical_order(&case.test_steps));
        assert_eq!(case.metadata["generation_method"], "ai_generated");
    }

    #[tokio::test]
    async fn long_plans_are_truncated() {
        let plan: Vec<Value> = (1..=14)
            .map(|i| json!({"action": format!("检查信号{i}"), "step_type": "verification"}))
            .collect();
        let transport = ScriptedTransport::new();
        transport.push_json(&Value::Array(plan));
        let generator = CaseGenerator::new(Some(scripted_client(transport)));

        let case = generator
            .generate("验证唤醒", &vcu_hil(), &SpecAnalysis::empty("验证唤醒"), None)
            .await;

        assert_eq!(case.test_steps.len(), MAX_STEPS);
        assert_eq!(case.test_steps.last().map(|s| s.action.as_str()), Some("检查信号10"));
    }

    #[tokio::test]
    async fn offline_without_template_uses_default_plan() {
        let generator = CaseGenerator::new(Some(offline_client()));
        let case = generator
            .generate("x", &vcu_hil(), &SpecAnalysis::empty("x"), None)
            .await;
        assert_eq!(case.test_steps.len(), 6);
        assert_eq!(case.metadata["generation_method"], "default");
        assert!(is_canonical_order(&case.test_steps));
    }

    #[test]
    fn step_data_is_deterministic() {
        assert_eq!(
            step_data(StepType::Stimulus, 3, "注入短路故障"),
            step_data(StepType::Stimulus, 3, "注入短路故障")
        );
        let data = step_data(StepType::Stimulus, 3, "注入短路故障");
        assert_eq!(data["fault_type"], "短路故障");
        let signal = step_data(StepType::Stimulus, 2, "发送电压信号");
        assert_eq!(signal["signal_value"], json!(9.0));
    }

    #[test]
    fn expected_results_are_capped_and_unique() {
        let steps: Vec<TestStep> = (0..15)
            .map(|i| TestStep::new(format!("S{i}"), StepType::Verification, "v").with_expected_result(format!("结果{i}")))
            .collect();
        let out = expected_results(&vcu_hil(), &steps);
        assert_eq!(out.len(), MAX_EXPECTED_RESULTS);
        assert_eq!(out[0], "VCU控制器功能正常");
    }
}
