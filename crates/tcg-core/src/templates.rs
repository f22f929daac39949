//! Test case templates and their selection
//!
//! Candidates are the built-in templates plus any `case_template` items in
//! the knowledge store whose content is a template document. Selection
//! never comes back empty while at least one template exists.

use crate::integrator::is_constraint_step;
use crate::model::{ClassificationResult, DataMap, StepType, TestCase};
use crate::taxonomy::{Domain, Subsystem, TestPattern};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tcg_knowledge::{KnowledgeStore, KnowledgeType};

const DOMAIN_WEIGHT: f64 = 0.3;
const SUBSYSTEM_WEIGHT: f64 = 0.3;
const PATTERN_WEIGHT: f64 = 0.2;
const LEXICAL_WEIGHT: f64 = 0.2;
const LEXICAL_KEYWORDS: &[&str] = &["测试", "验证", "功能", "性能", "安全"];
const MAX_ALTERNATIVES: usize = 3;
/// Similarity above which a template counts as an alternative to another
pub const ALTERNATIVE_SIMILARITY: f64 = 0.5;

fn default_verification_method() -> String {
    "通用验证".to_string()
}

/// Parameterized step; `{name}` tokens are filled at generation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub step_type: StepType,
    pub action_template: String,
    #[serde(default = "default_verification_method")]
    pub verification_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl StepTemplate {
    #[must_use]
    pub fn new(step_type: StepType, action: &str, method: &str) -> Self {
        Self {
            step_type,
            action_template: action.to_string(),
            verification_method: method.to_string(),
            description: None,
            timeout: None,
        }
    }
}

/// Reusable skeleton of parameterized steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "lenient::label")]
    pub domain: Domain,
    #[serde(default, deserialize_with = "lenient::labels")]
    pub applicable_subsystems: Vec<Subsystem>,
    #[serde(default, deserialize_with = "lenient::labels")]
    pub test_patterns: Vec<TestPattern>,
    pub step_templates: Vec<StepTemplate>,
    #[serde(default)]
    pub default_data: DataMap,
    /// Knowledge item the template was loaded from
    #[serde(skip)]
    pub knowledge_id: Option<String>,
}

impl CaseTemplate {
    /// Template capturing the step structure of a finished case. Constraint
    /// verification steps are left out.
    #[must_use]
    pub fn from_test_case(case: &TestCase) -> Self {
        Self {
            id: format!("learned_{}", case.id.to_lowercase()),
            name: format!("{}模板", case.name),
            description: case.description.clone(),
            domain: case.domain,
            applicable_subsystems: vec![case.subsystem],
            test_patterns: case.test_patterns.clone(),
            step_templates: case
                .test_steps
                .iter()
                .filter(|s| !is_constraint_step(s))
                .map(|s| StepTemplate {
                    step_type: s.step_type,
                    action_template: s.action.clone(),
                    verification_method: s.verification_method.clone(),
                    description: (!s.description.is_empty()).then(|| s.description.clone()),
                    timeout: s.timeout,
                })
                .collect(),
            default_data: DataMap::new(),
            knowledge_id: None,
        }
    }

    fn supports(&self, subsystem: Subsystem) -> bool {
        self.applicable_subsystems.contains(&subsystem)
    }

    fn shares_pattern(&self, patterns: &[TestPattern]) -> bool {
        self.test_patterns.iter().any(|p| patterns.contains(p))
    }
}

mod lenient {
    use crate::taxonomy::Label;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub(super) fn label<'de, D, L>(d: D) -> Result<L, D::Error>
    where
        D: Deserializer<'de>,
        L: Label,
    {
        let raw = String::deserialize(d)?;
        L::parse(&raw).ok_or_else(|| D::Error::custom(format!("unknown label '{raw}'")))
    }

    pub(super) fn labels<'de, D, L>(d: D) -> Result<Vec<L>, D::Error>
    where
        D: Deserializer<'de>,
        L: Label,
    {
        let raw = Vec::<String>::deserialize(d)?;
        Ok(raw.iter().filter_map(|s| L::parse(s)).collect())
    }
}

/// The two templates every installation starts with
#[must_use]
pub fn builtin_templates() -> Vec<CaseTemplate> {
    let controllers = vec![Subsystem::Vcu, Subsystem::Bms, Subsystem::Mcu];
    vec![
        CaseTemplate {
            id: "hil_functional_test".into(),
            name: "HIL功能测试模板".into(),
            description: "用于HIL环境下的基础功能测试".into(),
            domain: Domain::HilTesting,
            applicable_subsystems: controllers.clone(),
            test_patterns: vec![TestPattern::Functional],
            step_templates: vec![
                StepTemplate::new(StepType::Setup, "设置测试环境，初始化{controller}控制器", "环境检查"),
                StepTemplate::new(StepType::Stimulus, "发送{signal}信号到{controller}", "信号确认"),
                StepTemplate::new(StepType::Verification, "验证{controller}响应", "数据比对"),
                StepTemplate::new(StepType::Record, "记录{controller}响应数据", "数据完整性检查"),
                StepTemplate::new(StepType::Cleanup, "恢复{controller}初始状态", "状态确认"),
            ],
            default_data: json!({
                "voltage": {"normal": 12.0, "boundary": [9, 16]},
                "response_time": {"max": 100},
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            knowledge_id: None,
        },
        CaseTemplate {
            id: "fault_injection_test".into(),
            name: "故障注入测试模板".into(),
            description: "用于安全相关的故障注入测试".into(),
            domain: Domain::HilTesting,
            applicable_subsystems: controllers,
            test_patterns: vec![TestPattern::FaultInjection, TestPattern::Safety],
            step_templates: vec![
                StepTemplate::new(StepType::Setup, "设置正常工况环境", "状态确认"),
                StepTemplate::new(StepType::Stimulus, "注入{fault_type}故障", "故障确认"),
                StepTemplate::new(StepType::Verification, "验证安全机制响应", "安全状态检查"),
                StepTemplate::new(StepType::Record, "记录故障响应数据", "数据完整性检查"),
                StepTemplate::new(StepType::Cleanup, "清除故障并恢复{controller}状态", "状态确认"),
            ],
            default_data: json!({"fault_types": ["短路", "开路", "通信故障"]})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            knowledge_id: None,
        },
    ]
}

/// Weighted match of a template against a classified requirement, in 0..=1
#[must_use]
pub fn score_template(
    template: &CaseTemplate,
    requirement: &str,
    classification: &ClassificationResult,
) -> f64 {
    let mut score = 0.0;
    if template.domain == classification.domain {
        score += DOMAIN_WEIGHT;
    }
    if template.supports(classification.subsystem) {
        score += SUBSYSTEM_WEIGHT;
    }
    if template.shares_pattern(&classification.test_patterns) {
        score += PATTERN_WEIGHT;
    }
    let requirement = requirement.to_lowercase();
    let description = template.description.to_lowercase();
    let shared = LEXICAL_KEYWORDS
        .iter()
        .filter(|k| requirement.contains(*k) && description.contains(*k))
        .count();
    score += (shared as f64 / 3.0).min(1.0) * LEXICAL_WEIGHT;
    score.min(1.0)
}

/// Structural similarity of two templates, in 0..=1
#[must_use]
pub fn template_similarity(a: &CaseTemplate, b: &CaseTemplate) -> f64 {
    let mut similarity = 0.0;
    if a.domain == b.domain {
        similarity += 0.3;
    }
    if a.applicable_subsystems.iter().any(|s| b.supports(*s)) {
        similarity += 0.3;
    }
    if a.shares_pattern(&b.test_patterns) {
        similarity += 0.2;
    }
    let head = |t: &CaseTemplate| -> Vec<StepType> {
        t.step_templates.iter().take(3).map(|s| s.step_type).collect()
    };
    if !a.step_templates.is_empty() && head(a) == head(b) {
        similarity += 0.2;
    }
    f64::min(similarity, 1.0)
}

/// Why a template fits a classification
#[must_use]
pub fn match_reason(template: &CaseTemplate, classification: &ClassificationResult) -> String {
    let mut reasons = Vec::new();
    if template.domain == classification.domain {
        reasons.push("相同测试领域");
    }
    if template.supports(classification.subsystem) {
        reasons.push("支持相同子系统");
    }
    if template.shares_pattern(&classification.test_patterns) {
        reasons.push("包含相同测试模式");
    }
    if reasons.is_empty() {
        "通用备选模板".to_string()
    } else {
        reasons.join("；")
    }
}

/// Template with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTemplate {
    pub template: CaseTemplate,
    pub score: f64,
}

/// Best template plus runner-ups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSelection {
    pub template: CaseTemplate,
    pub score: f64,
    pub alternatives: Vec<ScoredTemplate>,
    pub reasoning: String,
}

/// Template related to a chosen one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAlternative {
    pub template: CaseTemplate,
    pub similarity: f64,
    pub reason: String,
}

/// Ranks templates for a classification
#[derive(Debug)]
pub struct TemplateSelector {
    builtin: Vec<CaseTemplate>,
    store: Option<Arc<KnowledgeStore>>,
}

impl TemplateSelector {
    /// Built-in templates plus those stored in `store`
    #[must_use]
    pub fn new(store: Option<Arc<KnowledgeStore>>) -> Self {
        Self {
            builtin: builtin_templates(),
            store,
        }
    }

    /// Replace the built-in set
    #[must_use]
    pub fn with_templates(mut self, templates: Vec<CaseTemplate>) -> Self {
        self.builtin = templates;
        self
    }

    /// Every candidate: built-ins first, then stored templates by id.
    /// Stored items that are not template documents are skipped.
    #[must_use]
    pub fn templates(&self) -> Vec<CaseTemplate> {
        let mut all = self.builtin.clone();
        let Some(store) = &self.store else {
            return all;
        };
        let mut stored: Vec<CaseTemplate> = store
            .list_by_type(KnowledgeType::CaseTemplate)
            .into_iter()
            .filter_map(|item| match serde_json::from_str::<CaseTemplate>(&item.content) {
                Ok(mut t) => {
                    if t.id.is_empty() {
                        t.id.clone_from(&item.id);
                    }
                    t.knowledge_id = Some(item.id);
                    Some(t)
                }
                Err(e) => {
                    tracing::debug!(id = %item.id, error = %e, "case_template item is not a template document");
                    None
                }
            })
            .collect();
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        for t in stored {
            if !all.iter().any(|b| b.id == t.id) {
                all.push(t);
            }
        }
        all
    }

    /// Pick the best template; `None` only when there are no templates at all
    #[must_use]
    pub fn select(
        &self,
        requirement: &str,
        classification: &ClassificationResult,
    ) -> Option<TemplateSelection> {
        let all = self.templates();
        let filtered: Vec<&CaseTemplate> = all
            .iter()
            .filter(|t| {
                t.domain == classification.domain
                    || t.supports(classification.subsystem)
                    || t.shares_pattern(&classification.test_patterns)
            })
            .collect();
        let candidates: Vec<&CaseTemplate> = if filtered.is_empty() {
            all.iter().collect()
        } else {
            filtered
        };

        let mut scored: Vec<ScoredTemplate> = candidates
            .into_iter()
            .map(|t| ScoredTemplate {
                score: score_template(t, requirement, classification),
                template: t.clone(),
            })
            .collect();
        // stable: ties keep candidate order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut ranked = scored.into_iter();
        let Some(best) = ranked.next() else {
            tracing::warn!("no templates available");
            return None;
        };
        let alternatives: Vec<ScoredTemplate> = ranked.take(MAX_ALTERNATIVES).collect();
        let reasoning = format!(
            "{}（得分 {:.2}）：{}",
            best.template.name,
            best.score,
            match_reason(&best.template, classification)
        );
        tracing::info!(template = %best.template.id, score = best.score, alternatives = alternatives.len(), "template selected");

        Some(TemplateSelection {
            template: best.template,
            score: best.score,
            alternatives,
            reasoning,
        })
    }

    /// Templates structurally close to `selected`, most similar first
    #[must_use]
    pub fn alternatives_for(
        &self,
        selected: &CaseTemplate,
        classification: &ClassificationResult,
    ) -> Vec<TemplateAlternative> {
        let mut out: Vec<TemplateAlternative> = self
            .templates()
            .into_iter()
            .filter(|t| t.id != selected.id)
            .filter_map(|t| {
                let similarity = template_similarity(selected, &t);
                (similarity > ALTERNATIVE_SIMILARITY).then(|| TemplateAlternative {
                    reason: match_reason(&t, classification),
                    template: t,
                    similarity,
                })
            })
            .collect();
        out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        out.truncate(MAX_ALTERNATIVES);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tcg_knowledge::NewKnowledge;
    use tcg_test_utils::empty_store;

    fn classification(domain: Domain, subsystem: Subsystem, patterns: Vec<TestPattern>) -> ClassificationResult {
        ClassificationResult {
            domain,
            subsystem,
            test_patterns: patterns,
            confidence: 0.8,
            reasoning: String::new(),
            constraints: vec![],
            standards: vec![],
            metadata: DataMap::new(),
        }
    }

    #[test]
    fn fault_injection_wins_for_safety_patterns() {
        let c = classification(Domain::HilTesting, Subsystem::Vcu, vec![TestPattern::FaultInjection]);
        let selection = TemplateSelector::new(None)
            .select("验证VCU故障注入后的安全状态", &c)
            .unwrap();
        assert_eq!(selection.template.id, "fault_injection_test");
        assert_eq!(selection.alternatives.len(), 1);
        assert!(selection.score > selection.alternatives[0].score);
    }

    #[test]
    fn ties_keep_input_order() {
        let c = classification(Domain::Safety, Subsystem::Vcu, vec![TestPattern::Functional, TestPattern::Safety]);
        let selection = TemplateSelector::new(None).select("验证功能安全测试", &c).unwrap();
        assert_eq!(selection.template.id, "hil_functional_test");
        assert!((selection.score - selection.alternatives[0].score).abs() < 1e-12);
    }

    #[test]
    fn unrelated_classification_still_gets_a_template() {
        let c = classification(Domain::EnergyConsumption, Subsystem::Adas, vec![TestPattern::Diagnostic]);
        let selection = TemplateSelector::new(None).select("续航", &c).unwrap();
        assert_eq!(selection.template.id, "hil_functional_test");
        assert_eq!(selection.score, 0.0);
    }

    #[test]
    fn empty_template_set_selects_nothing() {
        let c = classification(Domain::HilTesting, Subsystem::Vcu, vec![]);
        assert!(TemplateSelector::new(None).with_templates(vec![]).select("x", &c).is_none());
    }

    #[test]
    fn selection_is_deterministic() {
        let c = classification(Domain::HilTesting, Subsystem::Bms, vec![TestPattern::Safety]);
        let selector = TemplateSelector::new(None);
        let first = selector.select("验证BMS安全功能", &c).unwrap();
        for _ in 0..5 {
            assert_eq!(selector.select("验证BMS安全功能", &c).unwrap(), first);
        }
    }

    #[test]
    fn similarity_of_builtins() {
        let t = builtin_templates();
        // domain + subsystems + same leading step types
        assert!((template_similarity(&t[0], &t[1]) - 0.8).abs() < 1e-9);
        assert!((template_similarity(&t[0], &t[0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn alternatives_exclude_the_selected_template() {
        let selector = TemplateSelector::new(None);
        let t = builtin_templates();
        let c = classification(Domain::HilTesting, Subsystem::Vcu, vec![TestPattern::Functional]);
        let alts = selector.alternatives_for(&t[0], &c);
        assert_eq!(alts.len(), 1);
        assert_eq!(alts[0].template.id, "fault_injection_test");
        assert_eq!(alts[0].reason, "相同测试领域；支持相同子系统");
    }

    #[tokio::test]
    async fn stored_templates_join_the_candidates() {
        let store = empty_store();
        let doc = json!({
            "name": "BMS均衡测试模板",
            "description": "电池均衡功能测试",
            "domain": "HIL测试",
            "applicable_subsystems": ["BMS", "火星控制器"],
            "test_patterns": ["功能测试"],
            "step_templates": [
                {"step_type": "setup", "action_template": "初始化{controller}"},
                {"step_type": "verification", "action_template": "验证均衡电流"}
            ]
        });
        let id = store
            .add(NewKnowledge::new(doc.to_string(), KnowledgeType::CaseTemplate, "HIL测试"))
            .await
            .unwrap();
        store
            .add(NewKnowledge::new("不是模板", KnowledgeType::CaseTemplate, "HIL测试"))
            .await
            .unwrap();

        let templates = TemplateSelector::new(Some(store)).templates();
        assert_eq!(templates.len(), 3);
        let learned = &templates[2];
        assert_eq!(learned.id, id);
        assert_eq!(learned.knowledge_id.as_deref(), Some(id.as_str()));
        assert_eq!(learned.applicable_subsystems, vec![Subsystem::Bms]);
        assert_eq!(learned.step_templates[0].verification_method, "通用验证");
    }

    #[test]
    fn learned_templates_leave_out_constraint_steps() {
        use crate::model::TestStep;
        let steps = vec![
            TestStep::new("S1", StepType::Setup, "初始化VCU"),
            TestStep::new("S2", StepType::Stimulus, "发送Ready信号"),
            TestStep::new("S3", StepType::Verification, "验证VCU响应"),
            TestStep::new("VERIFY_004_1a2b3c4d", StepType::Verification, "添加故障注入步骤: 必须进行故障注入测试（ISO 26262）"),
            TestStep::new("S5", StepType::Cleanup, "恢复初始状态"),
        ];
        let case = TestCase {
            id: "TC_VCU_1".into(),
            name: "VCU Ready模式测试".into(),
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
            standards: vec!["ISO 26262".into()],
            metadata: DataMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let template = CaseTemplate::from_test_case(&case);

        assert_eq!(template.id, "learned_tc_vcu_1");
        let actions: Vec<&str> = template.step_templates.iter().map(|t| t.action_template.as_str()).collect();
        assert_eq!(actions, ["初始化VCU", "发送Ready信号", "验证VCU响应", "恢复初始状态"]);
    }
}
