//! Hierarchical classification
//!
//! A requirement moves forward through up to three phases:
//!
//! ```text
//! Unclassified -> RuleScored -> (ServiceEnhanced)? -> (StoreValidated)? -> Final
//! ```
//!
//! - rule scoring counts keyword hits per label and always runs
//! - the inference service is consulted only while confidence <= 0.8
//! - the knowledge store is consulted only while domain or subsystem is unset
//!
//! Confidence never decreases from one phase to the next. Defaults
//! (HIL testing, VCU, functional) fill whatever is still missing, so
//! classification always produces a result.

use crate::extractor::SpecAnalysis;
use crate::model::{ClassificationResult, DataMap};
use crate::standards::{canonical_name, detect_standards};
use crate::taxonomy::{Domain, Label, Subsystem, TestPattern};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tcg_inference::InferenceClient;
use tcg_knowledge::{KnowledgeStore, SearchFilter};

/// Rule confidence above which the inference service is skipped
pub const AI_CONFIDENCE_CUTOFF: f64 = 0.8;
/// Hits consulted during knowledge-store validation
const VALIDATION_TOP_K: usize = 5;
/// Constraints carried over from specification analysis
const ANALYSIS_CONSTRAINT_LIMIT: usize = 5;

const SYSTEM_PROMPT: &str = "你是一名汽车测试专家，负责对测试需求进行分层分类。只返回要求的JSON。";

/// Classification phases, recorded in `metadata.phases`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPhase {
    RuleScored,
    ServiceEnhanced,
    StoreValidated,
    Final,
}

/// Label reply from the inference service; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceReply {
    domain: Option<String>,
    subsystem: Option<String>,
    test_patterns: Vec<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
    constraints: Vec<String>,
    standards: Vec<String>,
}

/// Working state carried between phases
#[derive(Debug, Default)]
struct Draft {
    domain: Option<Domain>,
    subsystem: Option<Subsystem>,
    patterns: Vec<TestPattern>,
    confidence: f64,
    rule_confidence: f64,
    service_confidence: Option<f64>,
    service_reasoning: Option<String>,
    service_constraints: Vec<String>,
    service_standards: Vec<String>,
    knowledge_refs: Vec<String>,
    phases: Vec<ClassificationPhase>,
}

/// Labels with at least one keyword hit, in declaration order
fn keyword_scores<L: Label>(lowered: &str) -> Vec<(L, usize)> {
    L::ALL
        .iter()
        .map(|&l| (l, l.matched_keywords(lowered).len()))
        .filter(|(_, hits)| *hits > 0)
        .collect()
}

/// Highest score; the earliest label wins ties
fn arg_max<L: Copy>(scores: &[(L, usize)]) -> Option<(L, usize)> {
    scores.iter().copied().fold(None, |best, cur| match best {
        Some((_, hits)) if hits >= cur.1 => best,
        _ => Some(cur),
    })
}

/// Most frequent key in a tally; the first key seen wins ties
fn most_frequent<L: Copy>(tally: &IndexMap<L, usize>) -> Option<L>
where
    L: std::hash::Hash + Eq,
{
    let pairs: Vec<(L, usize)> = tally.iter().map(|(k, v)| (*k, *v)).collect();
    arg_max(&pairs).map(|(l, _)| l)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.trim().is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

/// Rule-based phase on its own
#[must_use]
pub fn rule_scores(requirement: &str) -> (Option<Domain>, Option<Subsystem>, Vec<TestPattern>, f64) {
    let lowered = requirement.to_lowercase();
    let mut confidence = 0.0;

    let domain = arg_max(&keyword_scores::<Domain>(&lowered)).map(|(d, hits)| {
        confidence = (hits as f64 / 3.0).min(1.0);
        d
    });
    let subsystem = arg_max(&keyword_scores::<Subsystem>(&lowered)).map(|(s, hits)| {
        confidence = confidence * 0.6 + (hits as f64 / 2.0).min(1.0) * 0.4;
        s
    });

    let mut patterns = keyword_scores::<TestPattern>(&lowered);
    // stable: equal scores keep declaration order
    patterns.sort_by(|a, b| b.1.cmp(&a.1));
    let patterns = patterns.into_iter().take(3).map(|(p, _)| p).collect();

    (domain, subsystem, patterns, confidence)
}

/// Assigns domain, subsystem and test patterns to a requirement
pub struct HierarchicalClassifier {
    ai: Option<Arc<InferenceClient>>,
    store: Arc<KnowledgeStore>,
}

impl std::fmt::Debug for HierarchicalClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalClassifier")
            .field("ai_enabled", &self.ai.is_some())
            .field("knowledge_items", &self.store.len())
            .finish()
    }
}

impl HierarchicalClassifier {
    /// Create classifier; `None` skips the inference phase
    #[must_use]
    pub fn new(ai: Option<Arc<InferenceClient>>, store: Arc<KnowledgeStore>) -> Self {
        Self { ai, store }
    }

    /// Classify a requirement, folding in specification analysis when present
    pub async fn classify(
        &self,
        requirement: &str,
        analysis: Option<&SpecAnalysis>,
    ) -> ClassificationResult {
        tracing::info!(requirement = %requirement.chars().take(50).collect::<String>(), "classifying requirement");

        let mut draft = Self::rule_phase(requirement);

        if draft.confidence <= AI_CONFIDENCE_CUTOFF {
            self.service_phase(requirement, &mut draft).await;
        } else {
            tracing::debug!(confidence = draft.confidence, "rule confidence high, skipping inference");
        }

        if draft.domain.is_none() || draft.subsystem.is_none() {
            self.store_phase(requirement, &mut draft).await;
        }

        let result = Self::finish(draft, requirement, analysis);
        tracing::info!(
            domain = %result.domain,
            subsystem = %result.subsystem,
            confidence = result.confidence,
            "classification complete"
        );
        result
    }

    fn rule_phase(requirement: &str) -> Draft {
        let (domain, subsystem, patterns, confidence) = rule_scores(requirement);
        Draft {
            domain,
            subsystem,
            patterns,
            confidence,
            rule_confidence: confidence,
            phases: vec![ClassificationPhase::RuleScored],
            ..Draft::default()
        }
    }

    async fn service_phase(&self, requirement: &str, draft: &mut Draft) {
        let Some(ai) = &self.ai else {
            return;
        };
        let labels = |all: &[&str]| all.join(", ");
        let prompt = format!(
            "作为汽车测试专家，请分析以下测试需求，确定其所属的测试领域、子系统和测试模式：\n\n\
             测试需求：{requirement}\n\n可选的测试领域：{}\n可选的子系统：{}\n可选的测试模式：{}\n\n\
             以JSON格式返回：\n{{\"domain\": \"领域名称\", \"subsystem\": \"子系统名称\", \
             \"test_patterns\": [\"模式1\", \"模式2\"], \"confidence\": 0.9, \"reasoning\": \"分类理由\", \
             \"constraints\": [], \"standards\": []}}",
            labels(&Domain::ALL.iter().map(|d| d.label()).collect::<Vec<_>>()),
            labels(&Subsystem::ALL.iter().map(|s| s.label()).collect::<Vec<_>>()),
            labels(&TestPattern::ALL.iter().map(|p| p.label()).collect::<Vec<_>>()),
        );

        let reply = match ai.complete_json::<ServiceReply>(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "inference classification failed, keeping rule result");
                return;
            }
        };

        if let Some(d) = reply.domain.as_deref().and_then(Domain::parse) {
            draft.domain = Some(d);
        }
        if let Some(s) = reply.subsystem.as_deref().and_then(Subsystem::parse) {
            draft.subsystem = Some(s);
        }
        let patterns: Vec<TestPattern> = reply
            .test_patterns
            .iter()
            .filter_map(|p| TestPattern::parse(p))
            .fold(Vec::new(), |mut acc, p| {
                if !acc.contains(&p) && acc.len() < 3 {
                    acc.push(p);
                }
                acc
            });
        if !patterns.is_empty() {
            draft.patterns = patterns;
        }

        let service_confidence = reply
            .confidence
            .filter(|c| c.is_finite())
            .map_or(0.0, |c| c.clamp(0.0, 1.0));
        draft.service_confidence = Some(service_confidence);
        draft.confidence = draft.confidence.max(service_confidence);
        draft.service_reasoning = reply.reasoning.filter(|r| !r.trim().is_empty());
        draft.service_constraints = reply.constraints;
        draft.service_standards = reply.standards;
        draft.phases.push(ClassificationPhase::ServiceEnhanced);
    }

    async fn store_phase(&self, requirement: &str, draft: &mut Draft) {
        let filter = SearchFilter::new().with_top_k(VALIDATION_TOP_K);
        let hits = match self.store.search(requirement, &filter).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "knowledge validation search failed");
                return;
            }
        };
        if hits.is_empty() {
            return;
        }

        let mut domains: IndexMap<Domain, usize> = IndexMap::new();
        let mut subsystems: IndexMap<Subsystem, usize> = IndexMap::new();
        for hit in &hits {
            draft.knowledge_refs.push(hit.item.id.clone());
            if let Some(d) = Domain::parse(&hit.item.domain) {
                *domains.entry(d).or_default() += 1;
            }
            for tag in &hit.item.tags {
                for &s in Subsystem::ALL {
                    if tag.contains(s.label()) || s.aliases().iter().any(|a| tag.eq_ignore_ascii_case(a)) {
                        *subsystems.entry(s).or_default() += 1;
                    }
                }
            }
        }

        if draft.domain.is_none() {
            draft.domain = most_frequent(&domains);
        }
        if draft.subsystem.is_none() {
            draft.subsystem = most_frequent(&subsystems);
        }
        draft.phases.push(ClassificationPhase::StoreValidated);
    }

    fn finish(mut draft: Draft, requirement: &str, analysis: Option<&SpecAnalysis>) -> ClassificationResult {
        let domain = draft.domain.unwrap_or(Domain::HilTesting);
        let subsystem = draft.subsystem.unwrap_or(Subsystem::Vcu);
        if draft.patterns.is_empty() {
            draft.patterns.push(TestPattern::Functional);
        }
        draft.phases.push(ClassificationPhase::Final);

        let lowered = requirement.to_lowercase();
        let domain_hits = domain.matched_keywords(&lowered);
        let subsystem_hits = subsystem.matched_keywords(&lowered);

        let mut reasoning_parts = Vec::new();
        if let Some(r) = &draft.service_reasoning {
            reasoning_parts.push(r.clone());
        }
        if !domain_hits.is_empty() {
            reasoning_parts.push(format!("匹配领域关键词: {}", domain_hits.iter().take(3).copied().collect::<Vec<_>>().join(", ")));
        }
        if !subsystem_hits.is_empty() {
            reasoning_parts.push(format!("匹配子系统关键词: {}", subsystem_hits.iter().take(3).copied().collect::<Vec<_>>().join(", ")));
        }
        let reasoning = if reasoning_parts.is_empty() {
            "基于综合分析和历史经验".to_string()
        } else {
            reasoning_parts.join("；")
        };

        let mut constraints = Vec::new();
        for c in draft.service_constraints {
            push_unique(&mut constraints, c);
        }
        let mut standards = Vec::new();
        for s in &draft.service_standards {
            push_unique(&mut standards, canonical_name(s));
        }
        if let Some(a) = analysis {
            for c in a.constraints.iter().take(ANALYSIS_CONSTRAINT_LIMIT) {
                push_unique(&mut constraints, c.content.clone());
            }
            for s in &a.identified_standards {
                push_unique(&mut standards, s.clone());
            }
        }
        for s in detect_standards(requirement) {
            push_unique(&mut standards, s);
        }

        let method = if draft.service_reasoning.is_some() {
            "ai_enhanced"
        } else {
            "rule_based"
        };
        let mut metadata = DataMap::new();
        metadata.insert("classification_method".into(), json!(method));
        metadata.insert("phases".into(), json!(draft.phases));
        metadata.insert(
            "confidence_breakdown".into(),
            json!({
                "rule_based": draft.rule_confidence,
                "ai_enhanced": draft.service_confidence.unwrap_or(0.0),
            }),
        );
        metadata.insert(
            "matched_keywords".into(),
            json!({ "domain": domain_hits, "subsystem": subsystem_hits }),
        );
        metadata.insert("knowledge_refs".into(), json!(draft.knowledge_refs));

        ClassificationResult {
            domain,
            subsystem,
            test_patterns: draft.patterns,
            confidence: draft.confidence,
            reasoning,
            constraints,
            standards,
            metadata,
        }
    }
}

/// Suggested additional test type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: String,
    pub reason: String,
}

impl TestRecommendation {
    fn new(kind: &str, priority: &str, reason: &str) -> Self {
        Self {
            kind: kind.to_string(),
            priority: priority.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Test types worth adding for a classification, deduplicated
#[must_use]
pub fn recommended_test_types(classification: &ClassificationResult) -> Vec<TestRecommendation> {
    let mut out: Vec<TestRecommendation> = Vec::new();
    let by_domain: &[(&str, &str, &str)] = match classification.domain {
        Domain::HilTesting => &[
            ("功能测试", "高", "验证基本功能正确性"),
            ("故障注入测试", "高", "验证安全机制"),
            ("边界测试", "中", "验证边界条件处理"),
        ],
        Domain::VehicleElectrical => &[
            ("EMC测试", "高", "验证电磁兼容性"),
            ("电源测试", "高", "验证电源系统可靠性"),
            ("网络测试", "中", "验证通信可靠性"),
        ],
        Domain::EnergyConsumption => &[
            ("续航测试", "高", "验证能量消耗"),
            ("充电测试", "高", "验证充电性能"),
            ("热管理测试", "中", "验证热管理系统"),
        ],
        Domain::BenchTesting | Domain::Environmental | Domain::Safety => &[],
    };
    let by_subsystem: &[(&str, &str, &str)] = match classification.subsystem {
        Subsystem::Vcu => &[
            ("模式切换测试", "高", "验证整车模式管理"),
            ("扭矩控制测试", "高", "验证扭矩分配逻辑"),
        ],
        Subsystem::Bms => &[
            ("SOC估算测试", "高", "验证电池状态估算精度"),
            ("均衡控制测试", "中", "验证电池均衡功能"),
        ],
        Subsystem::Mcu => &[
            ("扭矩响应测试", "高", "验证电机响应性能"),
            ("效率测试", "中", "验证电机效率"),
        ],
        _ => &[],
    };
    let mut candidates: Vec<TestRecommendation> = by_domain
        .iter()
        .chain(by_subsystem)
        .map(|(k, p, r)| TestRecommendation::new(k, p, r))
        .collect();
    for standard in &classification.standards {
        match standard.as_str() {
            "ISO 26262" => candidates.push(TestRecommendation::new(
                "安全机制验证测试",
                "高",
                "ISO 26262要求的安全机制验证",
            )),
            "ISO 21434" => candidates.push(TestRecommendation::new(
                "网络安全测试",
                "高",
                "ISO 21434要求的网络安全验证",
            )),
            _ => {}
        }
    }
    for rec in candidates {
        if !out.iter().any(|r| r.kind == rec.kind && r.reason == rec.reason) {
            out.push(rec);
        }
    }
    out
}
