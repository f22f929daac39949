//! Functional tests for the generation pipeline and its error semantics.
//!
//! These tests exercise the pipeline end to end:
//! - the reference requirement yields a VCU case that verifies ISO 26262.
//! - every stage degrades to its deterministic path when inference fails.
//! - only blank requirements and store consistency violations are fatal.
//! - learning feeds usage statistics and templates back into the store.
//! - learned templates never duplicate constraint verification steps.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tcg_core::error::{PipelineError, PoolError};
use tcg_core::integrator::is_constraint_step;
use tcg_core::model::is_canonical_order;
use tcg_core::prelude::*;
use tcg_core::{
    CallbackNotifier, Domain, HierarchicalClassifier, Subsystem, TemplateSelector, TestPattern,
    WorkflowConfig,
};
use tcg_inference::InferenceError;
use tcg_knowledge::{IndexError, KnowledgeError, KnowledgeType};
use tcg_test_utils::{
    empty_store, offline_client, scripted_client, seeded_store, ScriptedTransport,
    EVIDENCE_FREE_REQUIREMENT, REFERENCE_REQUIREMENT,
};

/// Helper: pipeline over an empty store with an inference client that always fails.
fn offline_pipeline() -> Pipeline {
    Pipeline::new(WorkflowConfig::default(), empty_store(), Some(offline_client()))
}

/// Tenet: the reference requirement produces a VCU case with an ISO 26262
/// verification step and a bounded, standard-aware quality score.
#[tokio::test]
async fn reference_requirement_end_to_end() {
    let pipeline = offline_pipeline();
    let request = GenerationRequest::new(REFERENCE_REQUIREMENT).with_standards(["ISO 26262"]);

    let result = pipeline.generate(&request).await;
    assert!(result.success, "offline generation should succeed: {:?}", result.error);

    let case = result.test_case.as_ref().expect("successful result carries a case");
    assert_eq!(case.subsystem, Subsystem::Vcu);
    assert!(is_canonical_order(&case.test_steps));
    assert!(
        case.test_steps.iter().any(|s| {
            (s.step_type == StepType::Verification || s.action.contains("故障注入"))
                && s.action.contains("ISO 26262")
        }),
        "some verification step must reference ISO 26262"
    );

    let metrics = result.metrics.as_ref().expect("metrics present");
    assert!((0.0..=1.0).contains(&metrics.quality_score));
    assert!(metrics.breakdown.standard_compliance > 0.0);
    assert!(result.explanations.is_some());
}

/// Tenet: malformed inference replies never abort a request; each stage falls
/// back to its rule-based path.
#[tokio::test]
async fn malformed_inference_replies_degrade_gracefully() {
    let transport = ScriptedTransport::new();
    transport.set_fallback_text("抱歉，我无法以JSON格式回答 {{ broken");
    let pipeline = Pipeline::new(WorkflowConfig::default(), empty_store(), Some(scripted_client(transport.clone())));

    let result = pipeline.generate(&GenerationRequest::new(REFERENCE_REQUIREMENT)).await;

    assert!(result.success);
    assert!(transport.call_count() > 0, "stages should have consulted the service");
    assert_eq!(result.test_case.unwrap().subsystem, Subsystem::Vcu);
}

/// Tenet: classification is total. With no keyword evidence, no inference
/// service and no knowledge, the defaults are HIL testing, VCU, functional.
#[tokio::test]
async fn classification_is_total_without_evidence() {
    let classifier = HierarchicalClassifier::new(Some(offline_client()), empty_store());

    let result = classifier.classify(EVIDENCE_FREE_REQUIREMENT, None).await;

    assert_eq!(result.domain, Domain::HilTesting);
    assert_eq!(result.subsystem, Subsystem::Vcu);
    assert_eq!(result.test_patterns, vec![TestPattern::Functional]);
}

/// Tenet: template selection is deterministic for a fixed template set and
/// classification.
#[tokio::test]
async fn template_selection_is_deterministic() {
    let classifier = HierarchicalClassifier::new(None, empty_store());
    let classification = classifier.classify(REFERENCE_REQUIREMENT, None).await;
    let selector = TemplateSelector::new(None);

    let ids = |s: &tcg_core::TemplateSelection| {
        (
            s.template.id.clone(),
            s.alternatives.iter().map(|a| a.template.id.clone()).collect::<Vec<_>>(),
        )
    };
    let first = selector.select(REFERENCE_REQUIREMENT, &classification).expect("built-ins exist");
    for _ in 0..5 {
        let again = selector.select(REFERENCE_REQUIREMENT, &classification).expect("built-ins exist");
        assert_eq!(ids(&first), ids(&again));
    }
}

/// Tenet: a blank requirement is the one request-level input error; it is
/// reported as a failed result, not a panic.
#[tokio::test]
async fn blank_requirement_is_fatal() {
    let pipeline = offline_pipeline();

    let err = pipeline.run(&GenerationRequest::new("  \n ")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(_)));
    assert!(err.is_fatal());

    let result = pipeline.generate(&GenerationRequest::new("")).await;
    assert_eq!(result.status(), RequestStatus::Failed);
}

/// Tenet: index divergence is fatal and never retried; transient inference
/// errors are retryable; authentication errors are neither.
#[test]
fn error_classification() {
    let divergence = PipelineError::from(KnowledgeError::Consistency {
        id: "case_template_1".into(),
        source: IndexError::unavailable("case_templates", "write failed"),
    });
    assert!(divergence.is_fatal());
    assert!(!divergence.is_retryable());

    assert!(PipelineError::from(InferenceError::RateLimited).is_retryable());
    let auth = PipelineError::from(InferenceError::Authentication {
        status: 403,
        message: "forbidden".into(),
    });
    assert!(!auth.is_retryable());
    assert!(!auth.is_fatal());

    assert!(PipelineError::Pool(PoolError::QueueFull(100)).is_retryable());
}

/// Tenet: with learning on, consulted knowledge gains usage statistics and a
/// case that meets the threshold is stored as a case template.
#[tokio::test]
async fn learning_updates_the_store() {
    let store = seeded_store().await;
    let mut config = WorkflowConfig::default();
    config.learning_quality_threshold = 0.0;
    let pipeline = Pipeline::new(config, Arc::clone(&store), None);
    let templates_before = store.list_by_type(KnowledgeType::CaseTemplate).len();

    let out = pipeline
        .run(&GenerationRequest::new(EVIDENCE_FREE_REQUIREMENT))
        .await
        .expect("offline run succeeds");

    let learned = store.list_by_type(KnowledgeType::CaseTemplate);
    assert_eq!(learned.len(), templates_before + 1);
    assert!(learned.iter().any(|i| i.extra.get("test_case_id")
        .and_then(|v| v.as_str()) == Some(out.test_case.id.as_str())));

    let refs = out.classification.metadata["knowledge_refs"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    for id in refs.iter().filter_map(|v| v.as_str()) {
        let item = store.get(id).expect("consulted item still stored");
        assert_eq!(item.usage_count, 1);
        assert!((item.success_rate - 1.0).abs() < 1e-9);
    }

    // The learned template is now a selection candidate.
    let selector = TemplateSelector::new(Some(Arc::clone(&store)));
    assert!(selector.templates().iter().any(|t| t.id.starts_with("learned_")));
}

/// Tenet: learning from a case never inflates later cases. Repeating one
/// request against a shared store keeps the step count stable and every
/// constraint verified exactly once.
#[tokio::test]
async fn repeated_requests_keep_step_count_stable() {
    let store = empty_store();
    let mut config = WorkflowConfig::default();
    config.learning_quality_threshold = 0.0;
    let pipeline = Pipeline::new(config, Arc::clone(&store), None);
    let request = GenerationRequest::new(REFERENCE_REQUIREMENT).with_standards(["ISO 26262"]);

    let mut counts = Vec::new();
    for _ in 0..4 {
        let out = pipeline.run(&request).await.expect("offline run succeeds");
        let steps = &out.test_case.test_steps;
        let verify: Vec<&str> = steps
            .iter()
            .filter(|s| is_constraint_step(s))
            .map(|s| s.action.as_str())
            .collect();
        let distinct: HashSet<&str> = verify.iter().copied().collect();
        assert_eq!(distinct.len(), verify.len(), "constraint verified twice: {verify:?}");
        counts.push(steps.len());
    }

    assert!(counts.windows(2).all(|w| w[0] == w[1]), "step counts drifted: {counts:?}");
    assert_eq!(store.list_by_type(KnowledgeType::CaseTemplate).len(), 4);
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<(String, RequestStatus)>>,
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, url: &str, result: &GenerationResult) {
        self.seen.lock().push((url.to_string(), result.status()));
    }
}

/// Tenet: a request with a callback URL triggers exactly one notification
/// carrying its final status; requests without one trigger none.
#[tokio::test]
async fn callbacks_fire_once_per_request() {
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = offline_pipeline().with_notifier(notifier.clone());

    pipeline
        .generate(&GenerationRequest::new(REFERENCE_REQUIREMENT).with_callback("http://hooks.local/done"))
        .await;
    pipeline.generate(&GenerationRequest::new(REFERENCE_REQUIREMENT)).await;
    pipeline
        .generate(&GenerationRequest::new("").with_callback("http://hooks.local/failed"))
        .await;

    let seen = notifier.seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("http://hooks.local/done".to_string(), RequestStatus::Completed),
            ("http://hooks.local/failed".to_string(), RequestStatus::Failed),
        ]
    );
}

/// Tenet: the worker pool completes every queued request and reports each
/// through its own result channel.
#[tokio::test]
async fn worker_pool_processes_a_batch() {
    let config = WorkflowConfig::default().with_max_concurrent_tasks(2);
    let pool = WorkerPool::start(Arc::new(offline_pipeline()), &config);

    let requirements = ["验证BMS均衡功能", "为VCU控制器设计HIL测试用例", "验证MCU扭矩响应时间<=50ms"];
    let handles: Vec<_> = requirements
        .iter()
        .map(|r| pool.submit(GenerationRequest::new(*r)).expect("queue has room"))
        .collect();

    for handle in handles {
        let id = handle.id;
        let result = handle.wait().await.expect("pool answers");
        assert_eq!(result.request_id, id);
        assert!(result.success);
        assert_eq!(pool.status(id), Some(RequestStatus::Completed));
    }
    assert_eq!(pool.stats().completed, 3);
    pool.shutdown().await;
}
