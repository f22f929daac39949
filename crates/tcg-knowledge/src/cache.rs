//! Content-addressed embedding cache using moka
//!
//! Embeddings are deterministic per text, so they are cached by a hash of the
//! text and shared across requests.

use crate::embedding::Embedding;
use moka::future::Cache;
use std::time::Duration;

/// Cache key: BLAKE3 hash of the embedded text
pub type CacheKey = [u8; 32];

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

/// Concurrent embedding cache
///
/// - Deduplication (same text = same key = single entry)
/// - LRU-style eviction at capacity
/// - Optional time-based expiration
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    inner: Cache<CacheKey, Embedding>,
}

impl EmbeddingCache {
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Key for a piece of text
    #[inline]
    #[must_use]
    pub fn key_for(text: &str) -> CacheKey {
        *blake3::hash(text.as_bytes()).as_bytes()
    }

    /// Insert embedding
    #[inline]
    pub async fn insert(&self, key: CacheKey, embedding: Embedding) {
        self.inner.insert(key, embedding).await;
    }

    /// Get embedding
    #[inline]
    pub async fn get(&self, key: &CacheKey) -> Option<Embedding> {
        self.inner.get(key).await
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for EmbeddingCache {
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::new(10_000)
    }
}
