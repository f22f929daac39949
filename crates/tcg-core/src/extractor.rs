//! Specification analysis and constraint extraction
//!
//! Constraints come from four sources, merged then deduplicated by
//! normalized content:
//! - rule patterns over the requirement text, clause by clause
//! - the same rules over supplied document text
//! - implications of the standards the request names or mentions
//! - the inference service, asked for anything the rules missed
//!
//! Every inference call is best-effort. A failed or malformed reply
//! contributes nothing and never fails the analysis.

use crate::documents::{load_documents, Document, DocumentSource, PlainTextSource};
use crate::model::{Constraint, ConstraintPriority, ConstraintType};
use crate::standards::{
    canonical_name, detect_asil, detect_standards, find_standard, standard_mentioned_in,
    StandardDetail,
};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tcg_inference::InferenceClient;

const SYSTEM_PROMPT: &str = "你是一名汽车电子测试规范分析专家，熟悉ISO 26262、ISO 21434和GB/T系列标准。只返回要求的JSON，不要附加解释。";

/// Document text sent to the inference service is cut to this many chars
const DOCUMENT_PREVIEW_CHARS: usize = 5000;
/// Rule constraints taken from one document
const MAX_DOCUMENT_CONSTRAINTS: usize = 50;
/// Existing constraints listed in the gap-filling prompt
const PROMPT_CONSTRAINT_LIMIT: usize = 10;

struct FamilyRules {
    kind: ConstraintType,
    patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid constraint pattern"))
        .collect()
}

/// Pattern families, checked in order; the first family with a match wins
static FAMILIES: Lazy<Vec<FamilyRules>> = Lazy::new(|| {
    vec![
        FamilyRules {
            kind: ConstraintType::Performance,
            patterns: compile(&[
                r"响应时间.*?[<=≥≤].*?\d+.*?(ms|s)",
                r"吞吐量.*?[>=≤≥].*?\d+",
                r"效率.*?[>=≤≥].*?\d+%",
                r"精度.*?[<=≥≤].*?\d+",
            ]),
        },
        FamilyRules {
            kind: ConstraintType::Safety,
            patterns: compile(&[
                r"安全.*?要求",
                r"防护.*?等级",
                r"故障.*?检测",
                r"保护.*?机制",
                r"ASIL[-\s]?[ABCD]",
            ]),
        },
        FamilyRules {
            kind: ConstraintType::Reliability,
            patterns: compile(&[
                r"MTBF.*?[>=≤≥].*?\d+",
                r"寿命.*?[>=≤≥].*?\d+",
                r"可靠性.*?[>=≤≥].*?\d+%",
            ]),
        },
        FamilyRules {
            kind: ConstraintType::Environmental,
            patterns: compile(&[
                r"温度.*?[-~].*?\d+.*?[°度]C",
                r"湿度.*?[<=≥≤].*?\d+%",
                r"振动.*?[<=≥≤].*?\d+",
                r"防护等级.*?IP\d+",
            ]),
        },
        FamilyRules {
            kind: ConstraintType::Compliance,
            patterns: compile(&[
                r"符合.*?(ISO|GB|企标|标准)",
                r"遵循.*?规范",
                r"满足.*?要求",
                r"应.*?符合",
            ]),
        },
    ]
});

static CLAUSE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[，。;；,\n]+").expect("valid clause separator"));

static DOC_STANDARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(ISO\s*\d+|GB/T?\s*\d+)").expect("valid document standard pattern")
});

const HIGH_PRIORITY_WORDS: &[&str] = &["必须", "强制", "禁止", "不得", "务必", "must", "mandatory", "forbidden", "shall"];
const MEDIUM_PRIORITY_WORDS: &[&str] = &["应", "宜", "需要", "建议", "should", "recommended"];

/// Constraint type by pattern family, `None` when no family matches
#[must_use]
pub fn match_family(text: &str) -> Option<ConstraintType> {
    FAMILIES
        .iter()
        .find(|f| f.patterns.iter().any(|p| p.is_match(text)))
        .map(|f| f.kind)
}

/// Constraint type, `Other` when no family matches
#[must_use]
pub fn classify_constraint_type(text: &str) -> ConstraintType {
    match_family(text).unwrap_or(ConstraintType::Other)
}

/// Priority by modal keywords
#[must_use]
pub fn determine_priority(text: &str) -> ConstraintPriority {
    let lowered = text.to_lowercase();
    if HIGH_PRIORITY_WORDS.iter().any(|w| lowered.contains(w)) {
        ConstraintPriority::High
    } else if MEDIUM_PRIORITY_WORDS.iter().any(|w| lowered.contains(w)) {
        ConstraintPriority::Medium
    } else {
        ConstraintPriority::Low
    }
}

/// Verification method by activity keywords
#[must_use]
pub fn determine_verification_method(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
    if has(&["测试", "试验", "验证", "test"]) {
        "测试验证"
    } else if has(&["检查", "审核", "评审", "review"]) {
        "文档评审"
    } else if has(&["分析", "评估", "计算", "analy"]) {
        "分析验证"
    } else {
        "通用验证"
    }
}

/// Split text into trimmed, non-empty clauses
#[must_use]
pub fn split_clauses(text: &str) -> Vec<String> {
    CLAUSE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn normalize_content(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !"，。,.;；:：、!！".contains(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Drop repeats by normalized content and assign ids `C001..`
#[must_use]
pub fn dedupe_constraints(constraints: Vec<Constraint>) -> Vec<Constraint> {
    let mut seen = HashSet::new();
    constraints
        .into_iter()
        .filter(|c| !c.content.trim().is_empty() && seen.insert(normalize_content(&c.content)))
        .enumerate()
        .map(|(i, mut c)| {
            c.id = format!("C{:03}", i + 1);
            c
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn document_prompt(doc: &Document) -> String {
    let preview = if doc.text.chars().count() > DOCUMENT_PREVIEW_CHARS {
        format!("{}...[内容已截断]", truncate_chars(&doc.text, DOCUMENT_PREVIEW_CHARS))
    } else {
        doc.text.clone()
    };
    format!(
        "分析以下规范文档内容，提取关键信息：\n\n文档内容：\n{preview}\n\n\
         以JSON格式返回：\n{{\"referenced_standards\": [], \"technical_requirements\": [], \
         \"test_provisions\": [], \"constraints\": [], \"acceptance_criteria\": []}}"
    )
}

/// Rule-based constraints from each matching clause of `text`
#[must_use]
pub fn rule_constraints(text: &str, source: &str) -> Vec<Constraint> {
    split_clauses(text)
        .into_iter()
        .filter_map(|clause| {
            let kind = match_family(&clause)?;
            let priority = determine_priority(&clause);
            let method = determine_verification_method(&clause);
            let reference = standard_mentioned_in(&clause);
            let mut c = Constraint::new("", clause, kind, source)
                .with_priority(priority)
                .with_verification_method(method);
            c.standard_reference = reference.map(ToString::to_string);
            Some(c)
        })
        .collect()
}

/// What the inference service read out of the requirement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementInsight {
    pub implicit_standards: Vec<String>,
    pub quality_attributes: Vec<String>,
    pub technical_constraints: Vec<String>,
    pub focus_areas: Vec<String>,
}

/// Structured reading of one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentAnalysis {
    pub referenced_standards: Vec<String>,
    pub technical_requirements: Vec<String>,
    pub test_provisions: Vec<String>,
    pub constraints: Vec<String>,
    pub acceptance_criteria: Vec<String>,
}

impl DocumentAnalysis {
    /// Line-oriented rule reading used when the inference service is unavailable
    #[must_use]
    pub fn from_rules(text: &str) -> Self {
        let mut analysis = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            for m in DOC_STANDARD.find_iter(line) {
                push_unique(&mut analysis.referenced_standards, m.as_str().to_string());
            }
            let clipped = truncate_chars(line, 200);
            if (line.contains('应') || line.contains("必须")) && line.contains('。') {
                push_unique(&mut analysis.technical_requirements, clipped.clone());
            }
            if (line.contains("不得") || line.contains("禁止")) && line.contains('。') {
                push_unique(&mut analysis.constraints, clipped.clone());
            }
            if line.contains("验收") || line.contains("通过标准") {
                push_unique(&mut analysis.acceptance_criteria, clipped);
            }
        }
        analysis
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Document with its analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
    pub chars: usize,
    pub analysis: DocumentAnalysis,
}

/// Checklist entry for compliance review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceItem {
    pub id: String,
    pub description: String,
    pub source: String,
    pub standard: String,
    pub verification_method: String,
    pub priority: ConstraintPriority,
    pub status: String,
}

/// Risk assessment; defaults to medium overall risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskAssessment {
    pub high_risk_areas: Vec<String>,
    pub test_complexity: serde_json::Map<String, Value>,
    pub compliance_risks: Vec<String>,
    pub mitigation_measures: Vec<String>,
    pub overall_risk_level: String,
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self {
            high_risk_areas: Vec::new(),
            test_complexity: serde_json::Map::new(),
            compliance_risks: Vec::new(),
            mitigation_measures: Vec::new(),
            overall_risk_level: "medium".to_string(),
        }
    }
}

impl RiskAssessment {
    /// Score contribution of the overall level
    #[must_use]
    pub fn level_score(&self) -> f64 {
        match self.overall_risk_level.as_str() {
            "high" => 60.0,
            "low" => 95.0,
            _ => 80.0,
        }
    }

    fn normalized(mut self) -> Self {
        let level = self.overall_risk_level.trim().to_lowercase();
        self.overall_risk_level = match level.as_str() {
            "high" | "高" => "high",
            "low" | "低" => "low",
            _ => "medium",
        }
        .to_string();
        self
    }
}

/// Result of specification analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecAnalysis {
    pub requirement: String,
    pub constraints: Vec<Constraint>,
    pub identified_standards: Vec<String>,
    pub standard_requirements: IndexMap<String, StandardDetail>,
    pub test_requirements: Vec<String>,
    pub compliance_checklist: Vec<ComplianceItem>,
    pub risk_assessment: RiskAssessment,
    pub documents: Vec<DocumentSummary>,
    /// 0..=100
    pub quality_score: f64,
}

impl SpecAnalysis {
    /// Analysis with no evidence, used when a requirement is analyzed offline
    #[must_use]
    pub fn empty(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            constraints: Vec::new(),
            identified_standards: Vec::new(),
            standard_requirements: IndexMap::new(),
            test_requirements: Vec::new(),
            compliance_checklist: Vec::new(),
            risk_assessment: RiskAssessment::default(),
            documents: Vec::new(),
            quality_score: 0.0,
        }
    }
}

/// Extracts constraints and standard obligations from a request
pub struct ConstraintExtractor {
    ai: Option<Arc<InferenceClient>>,
    documents: Arc<dyn DocumentSource>,
}

impl std::fmt::Debug for ConstraintExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintExtractor")
            .field("ai_enabled", &self.ai.is_some())
            .finish_non_exhaustive()
    }
}

impl ConstraintExtractor {
    /// Create extractor; `None` disables inference-service augmentation
    #[must_use]
    pub fn new(ai: Option<Arc<InferenceClient>>) -> Self {
        Self {
            ai,
            documents: Arc::new(PlainTextSource),
        }
    }

    /// Use another document collaborator
    #[must_use]
    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.documents = source;
        self
    }

    /// Analyze a requirement with its documents and requested standards
    pub async fn analyze(
        &self,
        requirement: &str,
        spec_files: &[PathBuf],
        standards: &[String],
    ) -> SpecAnalysis {
        tracing::info!(files = spec_files.len(), standards = standards.len(), "analyzing specification");

        let insight = self.requirement_insight(requirement).await;

        let documents = load_documents(self.documents.as_ref(), spec_files).await;
        let summaries: Vec<DocumentSummary> = documents
            .iter()
            .zip(self.document_analyses(&documents).await)
            .map(|(doc, analysis)| DocumentSummary {
                name: doc.name.clone(),
                chars: doc.text.chars().count(),
                analysis,
            })
            .collect();

        let identified_standards = identify_standards(requirement, standards, &insight);
        let asil = detect_asil(requirement);
        let standard_requirements: IndexMap<String, StandardDetail> = identified_standards
            .iter()
            .filter_map(|name| {
                find_standard(name).map(|t| (t.key.to_string(), StandardDetail::from_template(t, asil)))
            })
            .collect();

        let mut constraints = rule_constraints(requirement, "用户需求");
        for text in &insight.technical_constraints {
            constraints.push(
                Constraint::new("", text.clone(), classify_constraint_type(text), "用户需求")
                    .with_priority(determine_priority(text))
                    .with_verification_method(determine_verification_method(text)),
            );
        }
        for (doc, summary) in documents.iter().zip(&summaries) {
            constraints.extend(document_constraints(doc, &summary.analysis));
        }
        constraints.extend(standard_constraints(&standard_requirements));

        let ai_constraints = self.gap_constraints(requirement, &constraints, &summaries).await;
        constraints.extend(ai_constraints);
        let constraints = dedupe_constraints(constraints);

        let test_requirements = test_requirements(&insight, &constraints, &standard_requirements);
        let compliance_checklist = compliance_checklist(&constraints, &standard_requirements);
        let risk_assessment = self.risk_assessment(&constraints, &test_requirements).await;
        let quality_score = analysis_quality(&constraints, &compliance_checklist, &risk_assessment);

        tracing::info!(
            constraints = constraints.len(),
            standards = identified_standards.len(),
            quality_score,
            "specification analysis complete"
        );

        SpecAnalysis {
            requirement: requirement.to_string(),
            constraints,
            identified_standards,
            standard_requirements,
            test_requirements,
            compliance_checklist,
            risk_assessment,
            documents: summaries,
            quality_score,
        }
    }

    async fn ask_json<T: DeserializeOwned>(&self, stage: &str, prompt: &str) -> Option<T> {
        let ai = self.ai.as_ref()?;
        match ai.complete_json::<T>(SYSTEM_PROMPT, prompt).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(stage, error = %e, "inference unavailable, using rule-based result");
                None
            }
        }
    }

    async fn requirement_insight(&self, requirement: &str) -> RequirementInsight {
        let prompt = format!(
            "请分析以下汽车测试需求，提取关键信息：\n\n需求：{requirement}\n\n\
             请提取：\n1. 隐含引用的标准（如ISO 26262、GB/T等）\n2. 质量属性要求（可靠性、安全性、性能等）\n\
             3. 技术约束条件\n4. 测试重点领域\n\n以JSON格式返回：\n\
             {{\"implicit_standards\": [], \"quality_attributes\": [], \"technical_constraints\": [], \"focus_areas\": []}}"
        );
        self.ask_json("requirement_insight", &prompt)
            .await
            .unwrap_or_default()
    }

    /// One analysis per document, in order. Prompts go out as one batch
    /// bounded by the client's concurrency limit; a failed reply falls back
    /// to rule extraction for that document only.
    async fn document_analyses(&self, documents: &[Document]) -> Vec<DocumentAnalysis> {
        let Some(ai) = self.ai.as_ref().filter(|_| !documents.is_empty()) else {
            return documents.iter().map(|d| DocumentAnalysis::from_rules(&d.text)).collect();
        };
        let prompts: Vec<String> = documents.iter().map(document_prompt).collect();
        ai.batch_complete_json::<DocumentAnalysis>(SYSTEM_PROMPT, &prompts)
            .await
            .into_iter()
            .zip(documents)
            .map(|(reply, doc)| match reply {
                Ok(analysis) => analysis,
                Err(e) => {
                    tracing::warn!(
                        stage = "document_analysis",
                        document = %doc.name,
                        error = %e,
                        "inference unavailable, using rule-based result"
                    );
                    DocumentAnalysis::from_rules(&doc.text)
                }
            })
            .collect()
    }

    async fn gap_constraints(
        &self,
        requirement: &str,
        existing: &[Constraint],
        documents: &[DocumentSummary],
    ) -> Vec<Constraint> {
        if self.ai.is_none() {
            return Vec::new();
        }
        let listed: Vec<String> = existing
            .iter()
            .take(PROMPT_CONSTRAINT_LIMIT)
            .map(|c| format!("- {}", c.content))
            .collect();
        let doc_digest = truncate_chars(&serde_json::to_string(documents).unwrap_or_default(), 2000);
        let prompt = format!(
            "基于以下信息，请提取可能遗漏的约束条件：\n\n1. 测试需求：{requirement}\n\n2. 已提取的约束：\n{}\n\n\
             3. 规范文档摘要：\n{doc_digest}\n\n\
             请从性能、安全、可靠性、环境、合规五个角度补充。\n\
             以JSON数组格式返回，每个元素包含：\n\
             {{\"content\": \"约束内容\", \"type\": \"performance|safety|reliability|environmental|compliance|other\", \
             \"priority\": \"high|medium|low\", \"reason\": \"提取理由\"}}",
            listed.join("\n")
        );
        let Some(items) = self.ask_json::<Vec<Value>>("constraint_gap_fill", &prompt).await else {
            return Vec::new();
        };
        items.iter().filter_map(constraint_from_reply).collect()
    }

    async fn risk_assessment(
        &self,
        constraints: &[Constraint],
        test_requirements: &[String],
    ) -> RiskAssessment {
        if self.ai.is_none() {
            return RiskAssessment::default();
        }
        let listed: Vec<String> = constraints
            .iter()
            .take(15)
            .map(|c| format!("- {} (类型: {}, 优先级: {})", c.content, c.kind, c.priority.as_str()))
            .collect();
        let reqs: Vec<String> = test_requirements.iter().take(10).map(|r| format!("- {r}")).collect();
        let prompt = format!(
            "基于以下信息进行风险评估：\n\n约束条件：\n{}\n\n测试要求：\n{}\n\n\
             以JSON格式返回：\n{{\"high_risk_areas\": [], \"test_complexity\": {{}}, \"compliance_risks\": [], \
             \"mitigation_measures\": [], \"overall_risk_level\": \"high/medium/low\"}}",
            listed.join("\n"),
            reqs.join("\n")
        );
        self.ask_json::<RiskAssessment>("risk_assessment", &prompt)
            .await
            .map(RiskAssessment::normalized)
            .unwrap_or_default()
    }
}

/// One inference-proposed constraint; invalid entries are dropped
fn constraint_from_reply(item: &Value) -> Option<Constraint> {
    let content = item.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }
    let kind: ConstraintType = item.get("type")?.as_str()?.parse().ok()?;
    let priority = item
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| determine_priority(content));
    let mut c = Constraint::new("", content, kind, "AI分析")
        .with_priority(priority)
        .with_verification_method(determine_verification_method(content));
    c.standard_reference = standard_mentioned_in(content).map(ToString::to_string);
    Some(c)
}

fn identify_standards(requirement: &str, requested: &[String], insight: &RequirementInsight) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let candidates = requested
        .iter()
        .map(|s| canonical_name(s))
        .chain(detect_standards(requirement))
        .chain(insight.implicit_standards.iter().map(|s| canonical_name(s)));
    for name in candidates {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn document_constraints(doc: &Document, analysis: &DocumentAnalysis) -> Vec<Constraint> {
    let source = format!("规范文档: {}", doc.name);
    let mut out: Vec<Constraint> = rule_constraints(&doc.text, &source)
        .into_iter()
        .take(MAX_DOCUMENT_CONSTRAINTS)
        .collect();
    for text in &analysis.constraints {
        let mut c = Constraint::new("", text.clone(), classify_constraint_type(text), source.clone())
            .with_verification_method(determine_verification_method(text));
        c.standard_reference = standard_mentioned_in(text).map(ToString::to_string);
        out.push(c);
    }
    for c in &mut out {
        c.priority = ConstraintPriority::High;
    }
    out
}

fn standard_constraints(details: &IndexMap<String, StandardDetail>) -> Vec<Constraint> {
    let mut out = Vec::new();
    for (key, detail) in details {
        let texts = detail
            .test_implications
            .iter()
            .chain(detail.asil_requirement.iter());
        for text in texts {
            out.push(
                Constraint::new("", text.clone(), ConstraintType::Compliance, format!("标准: {key}"))
                    .with_priority(ConstraintPriority::High)
                    .with_verification_method("测试验证")
                    .with_standard(key.clone()),
            );
        }
    }
    out
}

fn test_requirements(
    insight: &RequirementInsight,
    constraints: &[Constraint],
    details: &IndexMap<String, StandardDetail>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for attr in &insight.quality_attributes {
        let extra: &[&str] = match attr.as_str() {
            "可靠性" => &["进行MTBF验证测试", "执行失效模式分析", "验证寿命指标"],
            "安全性" => &["进行故障注入测试", "验证安全状态转换", "检查安全机制有效性"],
            "性能" => &["验证响应时间", "测试吞吐量指标", "检查效率参数"],
            _ => &[],
        };
        for e in extra {
            push_unique(&mut out, (*e).to_string());
        }
    }
    for c in constraints {
        let line = match c.kind {
            ConstraintType::Performance => format!("验证{}", c.content),
            ConstraintType::Safety => format!("安全测试：{}", c.content),
            ConstraintType::Reliability => format!("可靠性测试：{}", c.content),
            _ => continue,
        };
        push_unique(&mut out, line);
    }
    for detail in details.values() {
        for r in &detail.test_requirements {
            push_unique(&mut out, r.clone());
        }
    }
    out
}

fn compliance_checklist(
    constraints: &[Constraint],
    details: &IndexMap<String, StandardDetail>,
) -> Vec<ComplianceItem> {
    let from_constraints = constraints
        .iter()
        .filter(|c| c.kind == ConstraintType::Compliance || c.standard_reference.is_some())
        .map(|c| {
            (
                c.content.clone(),
                c.source.clone(),
                c.standard_reference.clone().unwrap_or_else(|| "通用要求".to_string()),
                c.verification_method.clone(),
                c.priority,
            )
        });
    let from_standards = details.iter().flat_map(|(key, detail)| {
        detail.test_requirements.iter().map(move |r| {
            (
                r.clone(),
                format!("标准: {key}"),
                key.clone(),
                "测试验证".to_string(),
                ConstraintPriority::High,
            )
        })
    });
    from_constraints
        .chain(from_standards)
        .enumerate()
        .map(|(i, (description, source, standard, verification_method, priority))| ComplianceItem {
            id: format!("CL{:03}", i + 1),
            description,
            source,
            standard,
            verification_method,
            priority,
            status: "待验证".to_string(),
        })
        .collect()
}

/// Analysis quality on a 0..=100 scale
#[must_use]
pub fn analysis_quality(
    constraints: &[Constraint],
    checklist: &[ComplianceItem],
    risk: &RiskAssessment,
) -> f64 {
    let mut parts = Vec::with_capacity(3);
    if !constraints.is_empty() {
        let high = constraints
            .iter()
            .filter(|c| c.priority == ConstraintPriority::High)
            .count();
        parts.push((constraints.len() * 5 + high * 10).min(100) as f64);
    }
    if !checklist.is_empty() {
        parts.push((checklist.len() * 3).min(100) as f64);
    }
    parts.push(risk.level_score());
    parts.iter().sum::<f64>() / parts.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tcg_test_utils::{offline_client, scripted_client, ScriptedTransport, REFERENCE_REQUIREMENT};

    #[test]
    fn families_match_in_order() {
        assert_eq!(match_family("响应时间应<=100ms"), Some(ConstraintType::Performance));
        assert_eq!(match_family("需要符合ASIL C安全等级要求"), Some(ConstraintType::Safety));
        assert_eq!(match_family("mtbf >= 10000小时"), Some(ConstraintType::Reliability));
        assert_eq!(match_family("工作温度-40~85°C"), Some(ConstraintType::Environmental));
        assert_eq!(match_family("应符合企业规范"), Some(ConstraintType::Compliance));
        assert_eq!(match_family("验证Ready模式切换功能"), None);
    }

    #[test]
    fn priority_and_method_heuristics() {
        assert_eq!(determine_priority("必须进行故障注入测试"), ConstraintPriority::High);
        assert_eq!(determine_priority("The unit SHOULD reboot"), ConstraintPriority::Medium);
        assert_eq!(determine_priority("温度范围"), ConstraintPriority::Low);
        assert_eq!(determine_verification_method("需进行渗透测试"), "测试验证");
        assert_eq!(determine_verification_method("评审设计文档"), "文档评审");
        assert_eq!(determine_verification_method("计算失效率"), "分析验证");
        assert_eq!(determine_verification_method("电源稳定"), "通用验证");
    }

    #[test]
    fn rule_constraints_take_matching_clauses() {
        let found = rule_constraints(REFERENCE_REQUIREMENT, "用户需求");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ConstraintType::Safety);
        assert_eq!(found[0].standard_reference.as_deref(), Some("ISO 26262"));
        assert_eq!(found[0].priority, ConstraintPriority::Medium);
    }

    #[test]
    fn dedupe_ignores_punctuation_and_case() {
        let a = Constraint::new("", "响应时间<=100ms。", ConstraintType::Performance, "a");
        let b = Constraint::new("", "响应时间 <= 100MS", ConstraintType::Performance, "b");
        let c = Constraint::new("", "MTBF>=1000h", ConstraintType::Reliability, "c");
        let out = dedupe_constraints(vec![a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "C001");
        assert_eq!(out[0].source, "a");
        assert_eq!(out[1].id, "C002");
    }

    #[test]
    fn document_rules_fallback() {
        let text = "本产品应满足ISO 16750要求。\n禁止在高压下插拔。\n验收：全部用例通过";
        let analysis = DocumentAnalysis::from_rules(text);
        assert_eq!(analysis.referenced_standards, vec!["ISO 16750".to_string()]);
        assert_eq!(analysis.technical_requirements.len(), 1);
        assert_eq!(analysis.constraints.len(), 1);
        assert_eq!(analysis.acceptance_criteria.len(), 1);
    }

    #[test]
    fn quality_score_averages_present_parts() {
        let constraints = vec![
            Constraint::new("", "a", ConstraintType::Safety, "s").with_priority(ConstraintPriority::High),
        ];
        // constraint part 15, no checklist, medium risk 80
        let score = analysis_quality(&constraints, &[], &RiskAssessment::default());
        assert!((score - 47.5).abs() < 1e-9);
        assert!((analysis_quality(&[], &[], &RiskAssessment::default()) - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn offline_analysis_uses_rules_and_standards() {
        let extractor = ConstraintExtractor::new(Some(offline_client()));
        let analysis = extractor
            .analyze(REFERENCE_REQUIREMENT, &[], &["iso 26262".to_string()])
            .await;

        assert_eq!(analysis.identified_standards, vec!["ISO 26262".to_string()]);
        // one requirement clause, five implications, one ASIL C requirement
        assert_eq!(analysis.constraints.len(), 7);
        assert!(analysis
            .constraints
            .iter()
            .any(|c| c.source == "标准: ISO 26262" && c.content == "必须进行故障注入测试"));
        assert!(analysis.constraints.iter().any(|c| c.content.contains("ASIL C等级要求")));
        assert_eq!(analysis.risk_assessment.overall_risk_level, "medium");
        // 7 compliance-or-referenced constraints + 4 standard test requirements
        assert_eq!(analysis.compliance_checklist.len(), 11);
        assert!(analysis.compliance_checklist.iter().all(|i| i.status == "待验证"));
    }

    #[tokio::test]
    async fn invalid_ai_constraints_are_dropped() {
        let transport = ScriptedTransport::new();
        transport.push_json(&json!({"implicit_standards": ["GB/T 18384"], "technical_constraints": []}));
        transport.push_json(&json!([
            {"content": "电机转速响应时间<=50ms", "type": "performance", "priority": "high"},
            {"content": "外观整洁", "type": "aesthetic"},
            {"type": "safety"},
        ]));
        let extractor = ConstraintExtractor::new(Some(scripted_client(transport.clone())));

        let analysis = extractor.analyze("验证MCU扭矩控制", &[], &[]).await;

        let ai: Vec<_> = analysis.constraints.iter().filter(|c| c.source == "AI分析").collect();
        assert_eq!(ai.len(), 1);
        assert_eq!(ai[0].priority, ConstraintPriority::High);
        assert_eq!(analysis.identified_standards, vec!["GB/T 18384".to_string()]);
        assert!(analysis.standard_requirements.contains_key("GB/T 18384"));
    }

    #[tokio::test]
    async fn documents_contribute_high_priority_constraints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("规范.txt");
        std::fs::write(&path, "控制器响应时间应<=20ms。\n工作湿度<=95%").unwrap();

        let extractor = ConstraintExtractor::new(None);
        let analysis = extractor.analyze("验证BMS均衡", &[path], &[]).await;

        let doc: Vec<_> = analysis
            .constraints
            .iter()
            .filter(|c| c.source == "规范文档: 规范.txt")
            .collect();
        assert_eq!(doc.len(), 2);
        assert!(doc.iter().all(|c| c.priority == ConstraintPriority::High));
        assert_eq!(analysis.documents.len(), 1);
    }

    #[tokio::test]
    async fn document_prompts_are_batched_within_the_call_limit() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| {
                let path = dir.path().join(format!("规范{i}.txt"));
                std::fs::write(&path, format!("第{i}章 响应时间应<={}ms", 10 + i)).unwrap();
                path
            })
            .collect();

        let transport = ScriptedTransport::new();
        transport.set_latency(std::time::Duration::from_millis(20));
        let client = tcg_inference::InferenceClient::with_transport(
            transport.clone(),
            tcg_inference::InferenceConfig::default()
                .with_retry(tcg_test_utils::fast_retry())
                .with_max_concurrent_calls(2),
        );
        let extractor = ConstraintExtractor::new(Some(Arc::new(client)));

        let analysis = extractor.analyze("验证VCU扭矩响应", &paths, &[]).await;

        let document_calls = transport
            .user_prompts()
            .iter()
            .filter(|p| p.starts_with("分析以下规范文档内容"))
            .count();
        assert_eq!(document_calls, 5);
        assert_eq!(transport.peak_in_flight(), 2);
        // every reply failed, so each document fell back to its own rules
        assert_eq!(analysis.documents.len(), 5);
        assert_eq!(analysis.documents[3].name, "规范3.txt");
        assert!(analysis.constraints.iter().any(|c| c.source == "规范文档: 规范4.txt"));
    }
}
