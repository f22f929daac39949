//! Testing utilities for the TCG workspace
//!
//! Shared test doubles and fixtures:
//! - [`ScriptedTransport`]: queued inference replies with a call log
//! - [`StallingTransport`]: inference calls that hang for a fixed time
//! - [`FailingIndex`]: semantic index with switchable write/query failures
//! - fixtures for the reference requirement and a seeded knowledge store

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcg_inference::{
    ChatRequest, ChatResponse, ChatTransport, InferenceClient, InferenceConfig, InferenceError,
    RetryConfig,
};
use tcg_knowledge::{
    EmbeddingProvider, IndexError, InMemoryVectorIndex, KnowledgeStore, SearchFilter,
    SemanticIndex, StoreConfig, VectorHit, VectorRecord, DEFAULT_DIMENSION,
};

/// Requirement used by the end-to-end scenarios.
pub const REFERENCE_REQUIREMENT: &str =
    "为VCU控制器设计HIL测试用例，验证Ready模式切换功能，需要符合ISO 26262 ASIL C安全等级要求";

/// A requirement with no keyword evidence for any label.
pub const EVIDENCE_FREE_REQUIREMENT: &str = "请生成一个用例";

// ---------------------------------------------------------------------------
// Inference doubles
// ---------------------------------------------------------------------------

/// Replays queued replies in order. Once the queue is empty every call gets
/// the fallback outcome (`NotConfigured` unless overridden). An optional
/// latency keeps calls in flight so peak concurrency can be observed.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<ChatResponse, InferenceError>>>,
    fallback: Mutex<Result<ChatResponse, InferenceError>>,
    requests: Mutex<Vec<ChatRequest>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Err(InferenceError::NotConfigured("script exhausted".into()))),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Transport whose every call fails with `error`.
    #[must_use]
    pub fn failing(error: InferenceError) -> Arc<Self> {
        let t = Self::new();
        *t.fallback.lock() = Err(error);
        t
    }

    /// Queue a text reply.
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Ok(ChatResponse::from_text(text)));
        self
    }

    /// Queue a JSON reply.
    pub fn push_json(&self, value: &serde_json::Value) -> &Self {
        self.push_text(value.to_string())
    }

    /// Queue an error.
    pub fn push_error(&self, error: InferenceError) -> &Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Reply used once the queue is drained.
    pub fn set_fallback_text(&self, text: impl Into<String>) {
        *self.fallback.lock() = Ok(ChatResponse::from_text(text));
    }

    /// Hold every call for `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Most calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Concatenated user prompts, for asserting on prompt content.
    #[must_use]
    pub fn user_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.queue.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => self.fallback.lock().clone(),
        }
    }
}

/// Retry policy with millisecond backoff for tests.
#[must_use]
pub fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(1)
        .with_base_delay(Duration::from_millis(1))
        .with_call_timeout(Duration::from_millis(500))
}

/// Inference client over `transport` with test-friendly timing.
#[must_use]
pub fn scripted_client(transport: Arc<ScriptedTransport>) -> Arc<InferenceClient> {
    Arc::new(InferenceClient::with_transport(
        transport,
        InferenceConfig::default().with_retry(fast_retry()),
    ))
}

/// Client whose every call fails as if no API key were configured.
#[must_use]
pub fn offline_client() -> Arc<InferenceClient> {
    scripted_client(ScriptedTransport::new())
}

/// Holds every call for `stall`, then fails with `NotConfigured`. Keeps a
/// request busy long enough to cancel it or run it past its deadline.
pub struct StallingTransport {
    stall: Duration,
    calls: Mutex<usize>,
}

impl StallingTransport {
    #[must_use]
    pub fn new(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall,
            calls: Mutex::new(0),
        })
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ChatTransport for StallingTransport {
    async fn send(&self, _request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        *self.calls.lock() += 1;
        tokio::time::sleep(self.stall).await;
        Err(InferenceError::NotConfigured("stalled".into()))
    }
}

/// Client whose calls each block for `stall` before failing.
#[must_use]
pub fn stalled_client(stall: Duration) -> Arc<InferenceClient> {
    let retry = RetryConfig::default()
        .with_max_retries(0)
        .with_call_timeout(stall + Duration::from_secs(1));
    Arc::new(InferenceClient::with_transport(
        StallingTransport::new(stall),
        InferenceConfig::default().with_retry(retry),
    ))
}

// ---------------------------------------------------------------------------
// Knowledge doubles
// ---------------------------------------------------------------------------

/// In-memory index that fails writes or per-collection queries on demand.
#[derive(Debug)]
pub struct FailingIndex {
    inner: InMemoryVectorIndex,
    fail_writes: AtomicBool,
    broken: Mutex<HashSet<String>>,
}

impl FailingIndex {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryVectorIndex::new(DEFAULT_DIMENSION),
            fail_writes: AtomicBool::new(false),
            broken: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn break_collection(&self, collection: &str) {
        self.broken.lock().insert(collection.to_string());
    }

    pub fn heal(&self) {
        self.fail_writes(false);
        self.broken.lock().clear();
    }
}

#[async_trait]
impl SemanticIndex for FailingIndex {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), IndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable(collection, "forced write failure"));
        }
        self.inner.upsert(collection, record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        self.inner.delete(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>, IndexError> {
        if self.broken.lock().contains(collection) {
            return Err(IndexError::unavailable(collection, "forced query failure"));
        }
        self.inner.query(collection, vector, top_k, filter).await
    }

    async fn contains(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        self.inner.contains(collection, id).await
    }

    async fn len(&self, collection: &str) -> Result<usize, IndexError> {
        self.inner.len(collection).await
    }
}

/// Store backed by a [`FailingIndex`].
#[must_use]
pub fn failing_store() -> (Arc<KnowledgeStore>, Arc<FailingIndex>) {
    let index = FailingIndex::new();
    let store = KnowledgeStore::with_parts(
        EmbeddingProvider::new(),
        index.clone(),
        StoreConfig::default(),
    );
    (Arc::new(store), index)
}

/// Empty in-memory store.
#[must_use]
pub fn empty_store() -> Arc<KnowledgeStore> {
    Arc::new(KnowledgeStore::default())
}

/// Store holding the three seed items.
pub async fn seeded_store() -> Arc<KnowledgeStore> {
    let store = KnowledgeStore::default();
    store
        .seed_initial_knowledge()
        .await
        .expect("seeding an in-memory store cannot fail");
    Arc::new(store)
}
