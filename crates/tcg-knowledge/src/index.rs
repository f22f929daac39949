//! Semantic index: per-collection vector similarity search
//!
//! [`SemanticIndex`] is the seam to a vector database. The crate ships an
//! in-memory cosine implementation; `distance = 1 - cosine`.

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::filter::SearchFilter;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Debug;

/// Vector plus the metadata the index can filter on
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub domain: String,
    pub tags: Vec<String>,
}

/// One similarity hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Cosine distance in `[0, 2]`
    pub distance: f64,
}

/// Vector similarity backend
#[async_trait]
pub trait SemanticIndex: Send + Sync + Debug {
    /// Insert or replace a record in a collection
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), IndexError>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, IndexError>;

    /// Nearest records by ascending distance, filtered on metadata
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>, IndexError>;

    /// Whether a record exists
    async fn contains(&self, collection: &str, id: &str) -> Result<bool, IndexError>;

    /// Number of records in a collection
    async fn len(&self, collection: &str) -> Result<usize, IndexError>;
}

/// In-memory semantic index
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    collections: RwLock<HashMap<String, IndexMap<String, VectorRecord>>>,
}

impl InMemoryVectorIndex {
    /// Create index accepting vectors of `dimension`
    #[inline]
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

#[async_trait]
impl SemanticIndex for InMemoryVectorIndex {
    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<(), IndexError> {
        self.check_dimension(&record.vector)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.shift_remove(id))
            .is_some())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>, IndexError> {
        self.check_dimension(vector)?;
        let guard = self.collections.read();
        let Some(records) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let candidates: Vec<&VectorRecord> = records
            .values()
            .filter(|r| filter.matches_metadata(&r.domain, &r.tags))
            .collect();

        let mut hits: Vec<VectorHit> = candidates
            .par_iter()
            .map(|r| VectorHit {
                id: r.id.clone(),
                distance: 1.0 - cosine_similarity(vector, &r.vector),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn contains(&self, collection: &str, id: &str) -> Result<bool, IndexError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .is_some_and(|c| c.contains_key(id)))
    }

    async fn len(&self, collection: &str) -> Result<usize, IndexError> {
        Ok(self.collections.read().get(collection).map_or(0, IndexMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, domain: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            domain: domain.to_string(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn nearest_first() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("c", record("a", vec![1.0, 0.0], "d")).await.unwrap();
        index.upsert("c", record("b", vec![0.0, 1.0], "d")).await.unwrap();

        let hits = index
            .query("c", &[0.9, 0.1], 5, &SearchFilter::new())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn domain_filter_applies() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("c", record("a", vec![1.0, 0.0], "HIL测试")).await.unwrap();
        index.upsert("c", record("b", vec![1.0, 0.0], "能耗测试")).await.unwrap();

        let filter = SearchFilter::new().with_domains(["能耗测试"]);
        let hits = index.query("c", &[1.0, 0.0], 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let index = InMemoryVectorIndex::new(3);
        let err = index.upsert("c", record("a", vec![1.0], "d")).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 1 }));
    }

    #[tokio::test]
    async fn delete_and_contains() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("c", record("a", vec![1.0, 0.0], "d")).await.unwrap();
        assert!(index.contains("c", "a").await.unwrap());
        assert!(index.delete("c", "a").await.unwrap());
        assert!(!index.contains("c", "a").await.unwrap());
        assert_eq!(index.len("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_collection_is_empty() {
        let index = InMemoryVectorIndex::new(2);
        let hits = index
            .query("nothing", &[1.0, 0.0], 3, &SearchFilter::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
