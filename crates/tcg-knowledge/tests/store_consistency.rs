//! Functional tests for the hybrid store's cross-index guarantees.
//!
//! These tests exercise:
//! - self-retrievability of every added item within its own type
//! - compensating delete when the semantic write fails
//! - type-changing upserts that keep exactly one vector per item
//! - stores sized by a non-default embedding dimension
//! - partial-failure tolerance across collections
//! - keyword fallback when no collection can be read
//! - serialized usage updates under concurrency

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tcg_knowledge::{
    EmbeddingProvider, IndexError, InMemoryVectorIndex, KnowledgeError, KnowledgeStore,
    KnowledgeType, NewKnowledge, RetrievalMethod, SearchFilter, SemanticIndex, StoreConfig,
    VectorHit, VectorRecord, DEFAULT_DIMENSION,
};

/// Wraps the in-memory index and fails on demand.
#[derive(Debug)]
struct FlakyIndex {
    inner: InMemoryVectorIndex,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    broken_collections: parking_lot::Mutex<HashSet<String>>,
}

impl FlakyIndex {
    fn new() -> Self {
        Self {
            inner: InMemoryVectorIndex::new(DEFAULT_DIMENSION),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            broken_collections: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    fn break_collection(&self, name: &str) {
        self.broken_collections.lock().insert(name.to_string());
    }

    fn is_broken(&self, name: &str) -> bool {
        self.broken_collections.lock().contains(name)
    }
}

#[async_trait]
impl SemanticIndex for FlakyIndex {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), IndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable(collection, "forced write failure"));
        }
        self.inner.upsert(collection, record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable(collection, "forced delete failure"));
        }
        self.inner.delete(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>, IndexError> {
        if self.is_broken(collection) {
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

fn flaky_store() -> (KnowledgeStore, Arc<FlakyIndex>) {
    let index = Arc::new(FlakyIndex::new());
    let store = KnowledgeStore::with_parts(
        EmbeddingProvider::new(),
        index.clone(),
        StoreConfig::default(),
    );
    (store, index)
}

/// Tenet: every added item is found by searching its own type with its own content.
#[tokio::test]
async fn added_items_are_self_retrievable() {
    let store = KnowledgeStore::default();
    let contents = [
        ("ISO 26262要求进行故障注入测试", KnowledgeType::Standard),
        ("BMS均衡策略需覆盖高低温工况", KnowledgeType::BestPractice),
        ("边界值测试选取上下限", KnowledgeType::TestPattern),
        ("dSPACE SCALEXIO实时仿真机", KnowledgeType::Equipment),
        ("MCU负责电机扭矩闭环控制", KnowledgeType::Controller),
    ];

    for (content, kind) in contents {
        let id = store.add(NewKnowledge::new(content, kind, "HIL测试")).await.unwrap();
        let hits = store
            .search(content, &SearchFilter::new().with_type(kind).with_top_k(3))
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.item.id == id), "{content} not retrievable");
    }
}

/// Tenet: a failed semantic write leaves no structured record behind.
#[tokio::test]
async fn failed_semantic_write_rolls_back() {
    let (store, index) = flaky_store();
    index.fail_writes.store(true, Ordering::SeqCst);

    let err = store
        .add(NewKnowledge::new("注定失败的写入", KnowledgeType::Standard, "d"))
        .await
        .unwrap_err();

    let KnowledgeError::Consistency { id, .. } = &err else {
        panic!("expected consistency error, got {err:?}");
    };
    assert!(store.get(id).is_none());
    assert!(store.is_empty());
    assert!(store.is_consistent(id).await.unwrap());
}

/// Tenet: a type-changing upsert whose new vector cannot be written leaves
/// the item as it was, with its vector still in the old collection.
#[tokio::test]
async fn failed_type_change_keeps_previous_vector() {
    let (store, index) = flaky_store();
    let id = store
        .add(NewKnowledge::new("制动系统响应时间不超过100ms", KnowledgeType::BestPractice, "HIL测试"))
        .await
        .unwrap();
    assert!(store.is_consistent(&id).await.unwrap());

    let mut moved = store.get(&id).unwrap();
    moved.kind = KnowledgeType::Standard;
    index.fail_writes.store(true, Ordering::SeqCst);

    let err = store.upsert(moved).await.unwrap_err();
    assert!(err.is_consistency_violation());
    assert_eq!(store.get(&id).unwrap().kind, KnowledgeType::BestPractice);
    assert!(store.is_consistent(&id).await.unwrap());

    index.fail_writes.store(false, Ordering::SeqCst);
    let hits = store
        .search("制动系统响应时间", &SearchFilter::new().with_type(KnowledgeType::BestPractice))
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.item.id == id && h.method == RetrievalMethod::Semantic));
}

/// Tenet: when the old vector cannot be removed after a type change, the new
/// vector is withdrawn and the previous record restored.
#[tokio::test]
async fn failed_old_vector_removal_rolls_back_type_change() {
    let (store, index) = flaky_store();
    let id = store
        .add(NewKnowledge::new("故障注入覆盖传感器断线", KnowledgeType::TestPattern, "HIL测试"))
        .await
        .unwrap();

    let mut moved = store.get(&id).unwrap();
    moved.kind = KnowledgeType::BestPractice;
    index.fail_deletes.store(true, Ordering::SeqCst);
    assert!(store.upsert(moved).await.is_err());

    index.fail_deletes.store(false, Ordering::SeqCst);
    assert_eq!(store.get(&id).unwrap().kind, KnowledgeType::TestPattern);
    assert!(!index.inner.contains(KnowledgeType::BestPractice.collection(), &id).await.unwrap());
    assert!(store.is_consistent(&id).await.unwrap());
}

/// Tenet: a successful type change moves the vector to the new collection.
#[tokio::test]
async fn type_change_moves_vector() {
    let (store, index) = flaky_store();
    let id = store
        .add(NewKnowledge::new("VCU上电自检流程", KnowledgeType::BestPractice, "HIL测试"))
        .await
        .unwrap();

    let mut moved = store.get(&id).unwrap();
    moved.kind = KnowledgeType::Controller;
    assert!(store.upsert(moved).await.unwrap());

    assert!(index.inner.contains(KnowledgeType::Controller.collection(), &id).await.unwrap());
    assert!(!index.inner.contains(KnowledgeType::BestPractice.collection(), &id).await.unwrap());
    assert!(store.is_consistent(&id).await.unwrap());
}

/// Tenet: the configured dimension sizes both the embedder and the index, so
/// a non-default store adds and finds items like the default one.
#[tokio::test]
async fn non_default_dimension_store_adds_and_searches() {
    let config = StoreConfig {
        dimension: 64,
        cache_capacity: 16,
        ..StoreConfig::default()
    };
    let store = KnowledgeStore::new(config);

    let id = store
        .add(NewKnowledge::new("制动系统响应时间不超过100ms", KnowledgeType::BestPractice, "HIL测试"))
        .await
        .unwrap();
    assert!(store.is_consistent(&id).await.unwrap());

    let hits = store.search("制动", &SearchFilter::new()).await.unwrap();
    assert_eq!(hits.first().map(|h| h.item.id.as_str()), Some(id.as_str()));
    assert_eq!(hits[0].method, RetrievalMethod::Semantic);
}

/// Tenet: one failing collection does not abort search of the others.
#[tokio::test]
async fn partial_collection_failure_returns_partial_results() {
    let (store, index) = flaky_store();
    store
        .add(NewKnowledge::new("故障注入标准条款", KnowledgeType::Standard, "d"))
        .await
        .unwrap();
    let kept = store
        .add(NewKnowledge::new("故障注入测试模式", KnowledgeType::TestPattern, "d"))
        .await
        .unwrap();

    index.break_collection(KnowledgeType::Standard.collection());
    let hits = store.search("故障注入", &SearchFilter::new()).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.id, kept);
    assert_eq!(hits[0].method, RetrievalMethod::Semantic);
}

/// Tenet: with every collection down, search degrades to keyword scoring.
#[tokio::test]
async fn total_semantic_failure_uses_keyword_fallback() {
    let (store, index) = flaky_store();
    store
        .add(NewKnowledge::new("HIL 故障注入 步骤", KnowledgeType::TestPattern, "d"))
        .await
        .unwrap();

    for kind in KnowledgeType::ALL {
        index.break_collection(kind.collection());
    }
    let hits = store.search("故障注入", &SearchFilter::new()).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].method, RetrievalMethod::Keyword);
    assert!(hits[0].confidence > 0.0 && hits[0].confidence <= 1.0);
}

/// Tenet: concurrent usage updates on one id are serialized and lose nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_record_usage_is_serialized() {
    let store = Arc::new(KnowledgeStore::default());
    let id = store
        .add(NewKnowledge::new("并发统计", KnowledgeType::BestPractice, "d"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..64 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store.record_usage(&id, i % 4 != 0).unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let item = store.get(&id).unwrap();
    assert_eq!(item.usage_count, 64);
    assert!((item.success_rate - 48.0 / 64.0).abs() < 1e-9);
}
