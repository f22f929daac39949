//! Request pipeline
//!
//! Runs one [`GenerationRequest`] through every stage in order:
//! 1. specification analysis
//! 2. classification
//! 3. template selection
//! 4. case generation
//! 5. constraint integration
//! 6. explanation
//! 7. quality evaluation
//! 8. learning update
//!
//! Stages absorb inference failures themselves, so a request only fails on
//! an unusable requirement or a knowledge store consistency violation.

use crate::classifier::HierarchicalClassifier;
use crate::config::{AppConfig, WorkflowConfig};
use crate::documents::DocumentSource;
use crate::error::{PipelineError, PipelineResult};
use crate::evaluator::{QualityEvaluator, QualityMetrics};
use crate::explainer::{Explanations, LogicExplainer};
use crate::extractor::ConstraintExtractor;
use crate::generator::CaseGenerator;
use crate::integrator::{verification_summary, ConstraintIntegrator};
use crate::model::{ClassificationResult, TestCase};
use crate::notify::{CallbackNotifier, HttpNotifier, NoopNotifier};
use crate::standards::canonical_name;
use crate::taxonomy::Label;
use crate::templates::{CaseTemplate, TemplateSelection, TemplateSelector};
use crate::types::{GenerationRequest, GenerationResult};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tcg_inference::InferenceClient;
use tcg_knowledge::{KnowledgeError, KnowledgeStore, KnowledgeType, NewKnowledge};

/// Source tag on knowledge learned from generated cases
pub const LEARNED_SOURCE: &str = "learned";

/// Successful pipeline output before it is wrapped into a result
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub test_case: TestCase,
    pub explanations: Explanations,
    pub metrics: QualityMetrics,
    pub classification: ClassificationResult,
    pub template_id: Option<String>,
}

/// The staged generation pipeline
pub struct Pipeline {
    config: WorkflowConfig,
    store: Arc<KnowledgeStore>,
    ai_enabled: bool,
    extractor: ConstraintExtractor,
    classifier: HierarchicalClassifier,
    selector: TemplateSelector,
    generator: CaseGenerator,
    integrator: ConstraintIntegrator,
    explainer: LogicExplainer,
    evaluator: QualityEvaluator,
    notifier: Arc<dyn CallbackNotifier>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ai_enabled", &self.ai_enabled)
            .field("learning", &self.config.enable_learning)
            .field("knowledge_items", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline over an existing store. `ai` is ignored when AI enhancement
    /// is disabled in `config`.
    #[must_use]
    pub fn new(
        config: WorkflowConfig,
        store: Arc<KnowledgeStore>,
        ai: Option<Arc<InferenceClient>>,
    ) -> Self {
        let ai = ai.filter(|_| config.enable_ai_enhancement);
        Self {
            ai_enabled: ai.is_some(),
            extractor: ConstraintExtractor::new(ai.clone()),
            classifier: HierarchicalClassifier::new(ai.clone(), Arc::clone(&store)),
            selector: TemplateSelector::new(Some(Arc::clone(&store))),
            generator: CaseGenerator::new(ai),
            integrator: ConstraintIntegrator::new(),
            explainer: LogicExplainer::new(),
            evaluator: QualityEvaluator::new(),
            notifier: Arc::new(NoopNotifier),
            config,
            store,
        }
    }

    /// Build the inference client, the store and an HTTP notifier from `config`.
    ///
    /// A configured snapshot file is imported when it exists.
    ///
    /// # Errors
    /// - `PipelineError::Inference` when the HTTP client cannot be built
    /// - `PipelineError::Knowledge` when the snapshot cannot be imported
    pub async fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        let store = Arc::new(KnowledgeStore::new(config.knowledge.clone()));
        if let Some(path) = config.knowledge.snapshot_path.as_ref().filter(|p| p.exists()) {
            let report = store.import_from_file(path).await?;
            tracing::info!(path = %path.display(), ?report, "knowledge snapshot loaded");
        }

        let ai = if config.inference.has_credentials() {
            Some(Arc::new(InferenceClient::from_config(config.inference.clone())?))
        } else {
            tracing::info!("no inference credentials, running rule-based stages only");
            None
        };

        let notifier: Arc<dyn CallbackNotifier> = match HttpNotifier::with_timeout(HttpNotifier::DEFAULT_TIMEOUT) {
            Ok(n) => Arc::new(n),
            Err(e) => {
                tracing::warn!(error = %e, "callback client unavailable, callbacks disabled");
                Arc::new(NoopNotifier)
            }
        };

        Ok(Self::new(config.workflow.clone(), store, ai).with_notifier(notifier))
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn CallbackNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Document collaborator used for `spec_files`
    #[must_use]
    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.extractor = self.extractor.with_document_source(source);
        self
    }

    #[must_use]
    pub fn with_template_selector(mut self, selector: TemplateSelector) -> Self {
        self.selector = selector;
        self
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Process one request. Never fails: errors become a failed result.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        metrics::counter!("tcg_requests_total").increment(1);

        let result = match self.run(request).await {
            Ok(out) => {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::info!(
                    request_id = %request.id,
                    case = %out.test_case.id,
                    quality_score = out.metrics.quality_score,
                    elapsed_secs = elapsed,
                    "request completed"
                );
                GenerationResult {
                    request_id: request.id,
                    success: true,
                    test_case: Some(out.test_case),
                    explanations: Some(out.explanations),
                    metrics: Some(out.metrics),
                    error: None,
                    execution_time: elapsed,
                    generated_at: Utc::now(),
                }
            }
            Err(e) => {
                metrics::counter!("tcg_requests_failed_total").increment(1);
                tracing::error!(request_id = %request.id, error = %e, fatal = e.is_fatal(), "request failed");
                GenerationResult::failure(request.id, e.to_string(), started.elapsed().as_secs_f64())
            }
        };

        if let Some(url) = &request.callback_url {
            self.notifier.notify(url, &result).await;
        }
        result
    }

    /// Run every stage and return the raw output
    ///
    /// # Errors
    /// - `PipelineError::InvalidRequest` for a blank requirement
    /// - `PipelineError::Knowledge` when learning hits a consistency violation
    pub async fn run(&self, request: &GenerationRequest) -> PipelineResult<PipelineOutput> {
        let requirement = request.requirement.trim();
        if requirement.is_empty() {
            return Err(PipelineError::InvalidRequest("empty requirement".to_string()));
        }
        let id = request.id;

        tracing::info!(request_id = %id, stage = 1, "specification analysis");
        let analysis = self
            .extractor
            .analyze(requirement, &request.spec_files, &request.standards)
            .await;

        tracing::info!(request_id = %id, stage = 2, "classification");
        let mut classification = self.classifier.classify(requirement, Some(&analysis)).await;
        for s in &request.standards {
            let name = canonical_name(s);
            if !classification.standards.contains(&name) {
                classification.standards.push(name);
            }
        }

        tracing::info!(request_id = %id, stage = 3, "template selection");
        let selection = self.selector.select(requirement, &classification);
        if let Some(sel) = &selection {
            tracing::debug!(template = %sel.template.id, score = sel.score, "template selected");
        }

        tracing::info!(request_id = %id, stage = 4, "case generation");
        let mut case = self
            .generator
            .generate(requirement, &classification, &analysis, selection.as_ref().map(|s| &s.template))
            .await;

        tracing::info!(request_id = %id, stage = 5, "constraint integration");
        let inserted = self.integrator.integrate(&mut case, &analysis.constraints);
        let summary = verification_summary(&case, &analysis.constraints);
        case.metadata.insert("verification_steps_added".into(), json!(inserted));
        case.metadata.insert("step_count".into(), json!(case.test_steps.len()));
        case.metadata.insert(
            "constraint_coverage".into(),
            serde_json::to_value(&summary.coverage).unwrap_or(Value::Null),
        );

        tracing::info!(request_id = %id, stage = 6, "explanation");
        let explanations = self.explainer.explain(&case, &classification);

        tracing::info!(request_id = %id, stage = 7, "quality evaluation");
        let metrics = self.evaluator.evaluate(
            &case,
            Some(&explanations),
            &analysis.constraints,
            &classification.standards,
        );
        case.metadata.insert("quality_score".into(), json!(metrics.quality_score));

        if self.config.enable_learning {
            tracing::info!(request_id = %id, stage = 8, "learning update");
            if let Err(e) = self
                .learn(&case, &classification, selection.as_ref(), metrics.quality_score)
                .await
            {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(request_id = %id, error = %e, "learning update skipped");
            }
        }

        Ok(PipelineOutput {
            template_id: selection.map(|s| s.template.id),
            test_case: case,
            explanations,
            metrics,
            classification,
        })
    }

    /// Record usage of consulted knowledge and keep good cases as templates.
    /// Returns the id of the stored template, if one was stored.
    async fn learn(
        &self,
        case: &TestCase,
        classification: &ClassificationResult,
        selection: Option<&TemplateSelection>,
        quality: f64,
    ) -> PipelineResult<Option<String>> {
        let success = quality >= self.config.learning_quality_threshold;

        let mut consulted: Vec<String> = classification
            .metadata
            .get("knowledge_refs")
            .and_then(Value::as_array)
            .map(|refs| refs.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if let Some(kid) = selection.and_then(|s| s.template.knowledge_id.clone()) {
            consulted.push(kid);
        }
        consulted.sort();
        consulted.dedup();

        for kid in &consulted {
            match self.store.record_usage(kid, success) {
                Ok(item) => tracing::debug!(id = %kid, usage = item.usage_count, "usage recorded"),
                Err(KnowledgeError::NotFound(_)) => {
                    tracing::debug!(id = %kid, "consulted item no longer present");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !success {
            tracing::debug!(quality, threshold = self.config.learning_quality_threshold, "case below learning threshold");
            return Ok(None);
        }

        let template = CaseTemplate::from_test_case(case);
        let content = match serde_json::to_string(&template) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "case template not serializable");
                return Ok(None);
            }
        };
        let mut tags = vec![
            case.subsystem.short_name().to_string(),
            case.domain.label().to_string(),
        ];
        tags.extend(case.test_patterns.iter().map(|p| p.label().to_string()));
        tags.push(LEARNED_SOURCE.to_string());

        let new = NewKnowledge::new(content, KnowledgeType::CaseTemplate, classification.domain.label())
            .with_tags(tags)
            .with_source(LEARNED_SOURCE)
            .with_confidence(quality)
            .with_extra("test_case_id", case.id.clone());
        let stored = self.store.add(new).await?;
        tracing::info!(id = %stored, case = %case.id, quality, "case stored as template");
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestStatus;
    use tcg_knowledge::StoreConfig;

    fn offline_pipeline() -> Pipeline {
        Pipeline::new(
            WorkflowConfig::default(),
            Arc::new(KnowledgeStore::new(StoreConfig::default())),
            None,
        )
    }

    #[tokio::test]
    async fn blank_requirement_fails_the_request() {
        let pipeline = offline_pipeline();
        let result = pipeline.generate(&GenerationRequest::new("   ")).await;
        assert_eq!(result.status(), RequestStatus::Failed);
        assert!(result.error.unwrap().contains("empty requirement"));
    }

    #[tokio::test]
    async fn offline_request_completes() {
        let pipeline = offline_pipeline();
        let request = GenerationRequest::new("验证BMS均衡功能，响应时间<=100ms");
        let out = pipeline.run(&request).await.unwrap();
        assert!(out.metrics.quality_score > 0.0 && out.metrics.quality_score <= 1.0);
        assert!(crate::model::is_canonical_order(&out.test_case.test_steps));
        assert!(out.test_case.metadata.contains_key("constraint_coverage"));
    }

    #[tokio::test]
    async fn learning_respects_the_switch() {
        let store = Arc::new(KnowledgeStore::new(StoreConfig::default()));
        let config = WorkflowConfig::default().with_learning(false);
        let pipeline = Pipeline::new(config, Arc::clone(&store), None);
        pipeline
            .run(&GenerationRequest::new("为VCU控制器设计HIL测试用例"))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn ai_is_dropped_when_enhancement_disabled() {
        let config = WorkflowConfig::default().with_ai_enhancement(false);
        let client = Arc::new(InferenceClient::with_transport(
            Arc::new(tcg_inference::UnconfiguredTransport),
            tcg_inference::InferenceConfig::default(),
        ));
        let pipeline = Pipeline::new(config, Arc::new(KnowledgeStore::new(StoreConfig::default())), Some(client));
        assert!(!pipeline.ai_enabled);
    }
}
