//! TCG Core - requirement to test case generation
//!
//! Turns a natural-language requirement into a structured, explained and
//! scored test case:
//! - extracts typed constraints and standard obligations from the requirement
//! - classifies it by domain, subsystem and test pattern
//! - selects a case template and generates ordered test steps
//! - integrates constraint verification steps and measures coverage
//! - explains the design and scores the result
//! - runs requests through a bounded worker pool
//!
//! Every stage that consults the inference service has a deterministic
//! fallback, so the pipeline also works fully offline.
//!
//! # Example
//!
//! ```rust,ignore
//! use tcg_core::{load_config, GenerationRequest, Pipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None)?;
//! let pipeline = Pipeline::from_config(&config).await?;
//!
//! let request = GenerationRequest::new("为VCU控制器设计HIL测试用例，验证Ready模式切换功能")
//!     .with_standards(["ISO 26262"]);
//! let result = pipeline.generate(&request).await;
//!
//! println!("quality: {:?}", result.quality_score());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod classifier;
pub mod config;
pub mod documents;
pub mod error;
pub mod evaluator;
pub mod explainer;
pub mod extractor;
pub mod generator;
pub mod integrator;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod standards;
pub mod taxonomy;
pub mod templates;
pub mod test_data;
pub mod types;
pub mod worker_pool;

// Re-exports for convenience
pub use classifier::{recommended_test_types, HierarchicalClassifier, TestRecommendation};
pub use config::{load_config, AppConfig, KnowledgeConfig, WorkflowConfig};
pub use documents::{Document, DocumentSource, PlainTextSource};
pub use error::{ConfigError, PipelineError, PipelineResult, PoolError};
pub use evaluator::{QualityBreakdown, QualityEvaluator, QualityMetrics, QualityRecommendation};
pub use explainer::{Explanations, LogicExplainer};
pub use extractor::{ComplianceItem, ConstraintExtractor, RiskAssessment, SpecAnalysis};
pub use generator::{CaseGenerator, GenerationMethod};
pub use integrator::{
    constraint_coverage, verification_summary, ConstraintCoverage, ConstraintIntegrator,
    VerificationSummary,
};
pub use model::{
    ClassificationResult, Constraint, ConstraintPriority, ConstraintType, DataMap, StepType,
    TestCase, TestStep,
};
pub use notify::{CallbackNotifier, HttpNotifier, NoopNotifier};
pub use pipeline::{Pipeline, PipelineOutput};
pub use taxonomy::{Domain, Label, Subsystem, TestPattern};
pub use templates::{CaseTemplate, TemplateSelection, TemplateSelector};
pub use types::{GenerationRequest, GenerationResult, Priority, RequestId, RequestStatus};
pub use worker_pool::{PoolStats, RequestHandle, WorkerPool};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with TCG Core
    pub use crate::{
        AppConfig, ClassificationResult, Constraint, GenerationRequest, GenerationResult, Label,
        Pipeline, RequestStatus, StepType, TestCase, TestStep, WorkerPool,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
