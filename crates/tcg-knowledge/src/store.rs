//! Hybrid knowledge store
//!
//! Owns a [`StructuredIndex`] and a [`SemanticIndex`] and keeps them in
//! agreement: every id in the structured index has exactly one vector in the
//! collection named by its type. A failed semantic write rolls back the
//! structured write and surfaces [`KnowledgeError::Consistency`].
//!
//! Search embeds the query, asks every selected collection independently,
//! converts distance to `confidence = 1 - distance`, and merges. A failing
//! collection is skipped with a warning; when nothing semantic can be read the
//! store falls back to a keyword scan of the structured index.

use crate::cache::EmbeddingCache;
use crate::embedding::{Embedding, EmbeddingProvider, DEFAULT_DIMENSION};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::filter::{SearchFilter, DEFAULT_TOP_K};
use crate::index::{InMemoryVectorIndex, SemanticIndex, VectorHit, VectorRecord};
use crate::item::{derive_id, KnowledgeItem, KnowledgeType, NewKnowledge};
use crate::structured::{StoreStats, StructuredIndex};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Knowledge store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Embedding dimension
    pub dimension: usize,
    /// Embedding cache capacity
    pub cache_capacity: u64,
    /// Default number of search results
    pub default_top_k: usize,
    /// Optional JSON snapshot loaded at start and written on export
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            cache_capacity: 10_000,
            default_top_k: DEFAULT_TOP_K,
            snapshot_path: None,
        }
    }
}

impl StoreConfig {
    #[inline]
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }
}

/// How a hit was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Vector similarity
    Semantic,
    /// Keyword fallback
    Keyword,
}

/// Ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item: KnowledgeItem,
    /// Retrieval confidence (0..1)
    pub confidence: f64,
    pub method: RetrievalMethod,
}

/// The hybrid store
#[derive(Debug)]
pub struct KnowledgeStore {
    embedder: EmbeddingProvider,
    structured: StructuredIndex,
    semantic: Arc<dyn SemanticIndex>,
    config: StoreConfig,
}

impl KnowledgeStore {
    /// Store with the lexical embedder and an in-memory semantic index, both
    /// sized by `config.dimension`
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let embedder = EmbeddingProvider::with_dimension(config.dimension)
            .with_cache(EmbeddingCache::new(config.cache_capacity));
        let semantic = Arc::new(InMemoryVectorIndex::new(embedder.dimension()));
        Self::with_parts(embedder, semantic, config)
    }

    /// Store with explicit embedder and semantic backend
    #[must_use]
    pub fn with_parts(
        embedder: EmbeddingProvider,
        semantic: Arc<dyn SemanticIndex>,
        config: StoreConfig,
    ) -> Self {
        Self {
            embedder,
            structured: StructuredIndex::new(),
            semantic,
            config,
        }
    }

    /// Store config
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Add a knowledge item and return its id.
    ///
    /// Adding the same type and content twice within one second yields the
    /// same id and leaves the store unchanged.
    ///
    /// # Errors
    /// - `KnowledgeError::InvalidContent` for blank content
    /// - `KnowledgeError::Consistency` if the semantic write fails; the
    ///   structured record has been removed when this is returned
    pub async fn add(&self, new: NewKnowledge) -> KnowledgeResult<String> {
        if new.content.trim().is_empty() {
            return Err(KnowledgeError::InvalidContent("content is empty".to_string()));
        }

        let now = Utc::now();
        let base_id = derive_id(new.kind, &new.content, now);
        let mut id = base_id.clone();
        let mut suffix = 1;
        while let Some(existing) = self.structured.get(&id) {
            if existing.kind == new.kind && existing.content == new.content {
                tracing::debug!(id = %id, "knowledge item already present");
                return Ok(id);
            }
            id = format!("{base_id}_{suffix}");
            suffix += 1;
        }

        let embedding = self.embedder.encode(&new.content).await?;
        let item = new.into_item(id.clone(), now);
        self.write_both(item, None, &embedding).await?;

        tracing::info!(id = %id, degraded = embedding.degraded, "added knowledge item");
        Ok(id)
    }

    /// Insert or replace an item under its own id
    ///
    /// # Errors
    /// `KnowledgeError::Consistency` if the semantic write fails; the previous
    /// structured record (if any) is restored.
    pub async fn upsert(&self, item: KnowledgeItem) -> KnowledgeResult<bool> {
        if item.content.trim().is_empty() {
            return Err(KnowledgeError::InvalidContent(format!(
                "item {} has empty content",
                item.id
            )));
        }
        let embedding = self.embedder.encode(&item.content).await?;
        let previous = self.structured.get(&item.id);
        let existed = previous.is_some();
        self.write_both(item, previous, &embedding).await?;
        Ok(existed)
    }

    /// Structured write first, then the vector into the item's collection.
    /// On a type change the old vector is removed only after the new one is
    /// in place. Any semantic failure restores the previous state.
    async fn write_both(
        &self,
        item: KnowledgeItem,
        previous: Option<KnowledgeItem>,
        embedding: &Embedding,
    ) -> KnowledgeResult<()> {
        let id = item.id.clone();
        let kind = item.kind;
        let record = VectorRecord {
            id: id.clone(),
            vector: embedding.vector.clone(),
            domain: item.domain.clone(),
            tags: item.tags.clone(),
        };
        let moved_from = previous.as_ref().map(|p| p.kind).filter(|k| *k != kind);

        self.structured.put(item);

        if let Err(source) = self.semantic.upsert(kind.collection(), record).await {
            self.restore_structured(&id, previous);
            tracing::error!(id = %id, error = %source, "semantic write failed, structured write rolled back");
            return Err(KnowledgeError::Consistency { id, source });
        }

        if let Some(old_kind) = moved_from {
            if let Err(source) = self.semantic.delete(old_kind.collection(), &id).await {
                if let Err(e) = self.semantic.delete(kind.collection(), &id).await {
                    tracing::error!(id = %id, error = %e, "could not remove vector from new collection");
                }
                self.restore_structured(&id, previous);
                tracing::error!(id = %id, error = %source, "old vector not removed, type change rolled back");
                return Err(KnowledgeError::Consistency { id, source });
            }
        }
        Ok(())
    }

    fn restore_structured(&self, id: &str, previous: Option<KnowledgeItem>) {
        match previous {
            Some(prev) => {
                self.structured.put(prev);
            }
            None => {
                self.structured.remove(id);
            }
        }
    }

    /// Delete an item from both indexes
    ///
    /// # Errors
    /// - `KnowledgeError::NotFound` for unknown ids
    /// - `KnowledgeError::Consistency` if the semantic delete fails; the
    ///   structured record is restored
    pub async fn delete(&self, id: &str) -> KnowledgeResult<KnowledgeItem> {
        let item = self
            .structured
            .remove(id)
            .ok_or_else(|| KnowledgeError::NotFound(id.to_string()))?;

        if let Err(source) = self.semantic.delete(item.kind.collection(), id).await {
            self.structured.put(item);
            return Err(KnowledgeError::Consistency {
                id: id.to_string(),
                source,
            });
        }
        Ok(item)
    }

    /// Look up one item
    #[must_use]
    pub fn get(&self, id: &str) -> Option<KnowledgeItem> {
        self.structured.get(id)
    }

    /// All items matching the filter (no ranking, no truncation)
    #[must_use]
    pub fn list(&self, filter: &SearchFilter) -> Vec<KnowledgeItem> {
        self.structured.select(filter)
    }

    #[must_use]
    pub fn list_by_type(&self, kind: KnowledgeType) -> Vec<KnowledgeItem> {
        self.structured.by_type(kind)
    }

    #[must_use]
    pub fn list_by_domain(&self, domain: &str) -> Vec<KnowledgeItem> {
        self.structured.by_domain(domain)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.structured.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structured.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.structured.stats()
    }

    /// Ranked semantic search with keyword fallback.
    ///
    /// An empty result is a normal outcome.
    ///
    /// # Errors
    /// None today: every backend failure degrades to partial or keyword results.
    pub async fn search(&self, query: &str, filter: &SearchFilter) -> KnowledgeResult<Vec<SearchHit>> {
        if query.trim().is_empty() || filter.top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = match self.embedder.encode(query).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, using keyword search");
                return Ok(self.keyword_search(query, filter));
            }
        };

        let types = filter.selected_types();
        let queries = types.iter().map(|kind| {
            let collection = kind.collection();
            let vector = embedding.vector.as_slice();
            async move {
                (
                    collection,
                    self.semantic
                        .query(collection, vector, filter.top_k, filter)
                        .await,
                )
            }
        });
        let results = join_all(queries).await;

        let mut failures = 0usize;
        let mut hits: Vec<SearchHit> = Vec::new();
        for (collection, result) in results {
            match result {
                Ok(found) => hits.extend(self.resolve_hits(collection, found, filter)),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(collection, error = %e, "collection search failed, continuing");
                }
            }
        }

        if failures == types.len() {
            tracing::warn!("all collections unavailable, using keyword search");
            return Ok(self.keyword_search(query, filter));
        }

        hits.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        hits.truncate(filter.top_k);
        tracing::debug!(query, results = hits.len(), degraded = embedding.degraded, "knowledge search");
        Ok(hits)
    }

    fn resolve_hits(
        &self,
        collection: &str,
        found: Vec<VectorHit>,
        filter: &SearchFilter,
    ) -> Vec<SearchHit> {
        found
            .into_iter()
            .filter_map(|hit| {
                let Some(item) = self.structured.get(&hit.id) else {
                    tracing::warn!(collection, id = %hit.id, "vector without structured record");
                    return None;
                };
                if !filter.matches(&item) {
                    return None;
                }
                Some(SearchHit {
                    item,
                    confidence: (1.0 - hit.distance).clamp(0.0, 1.0),
                    method: RetrievalMethod::Semantic,
                })
            })
            .collect()
    }

    /// Keyword-density scan over the structured index
    #[must_use]
    pub fn keyword_search(&self, query: &str, filter: &SearchFilter) -> Vec<SearchHit> {
        self.structured
            .keyword_scan(query, filter)
            .into_iter()
            .map(|(item, confidence)| SearchHit {
                item,
                confidence,
                method: RetrievalMethod::Keyword,
            })
            .collect()
    }

    /// Record one use of an item; the only mutation of usage statistics
    ///
    /// # Errors
    /// `KnowledgeError::NotFound` for unknown ids
    pub fn record_usage(&self, id: &str, success: bool) -> KnowledgeResult<KnowledgeItem> {
        self.structured
            .record_usage(id, success)
            .ok_or_else(|| KnowledgeError::NotFound(id.to_string()))
    }

    /// Whether both halves of an item exist
    ///
    /// # Errors
    /// Propagates semantic backend errors
    pub async fn is_consistent(&self, id: &str) -> KnowledgeResult<bool> {
        let structured = self.structured.get(id);
        let in_any_collection = {
            let mut found = 0;
            for kind in KnowledgeType::ALL {
                if self.semantic.contains(kind.collection(), id).await? {
                    found += 1;
                }
            }
            found
        };
        Ok(match structured {
            Some(item) => {
                in_any_collection == 1 && self.semantic.contains(item.kind.collection(), id).await?
            }
            None => in_any_collection == 0,
        })
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
