//! Embedding provider: text → fixed-length vector
//!
//! Two embedders ship with the crate:
//! - [`NgramEmbedder`]: lexical character n-gram feature hashing, the primary model
//! - [`HashEmbedder`]: deterministic pseudo-random unit vector seeded by a SHA-256
//!   hash of the text, the fallback
//!
//! [`EmbeddingProvider`] composes a primary with the fallback. When the primary
//! fails the provider degrades to the fallback and marks the result; fallback
//! vectors carry no semantic meaning, so ranking quality drops but nothing fails.

use crate::cache::EmbeddingCache;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::sync::Arc;

/// Default embedding dimension
pub const DEFAULT_DIMENSION: usize = 384;

/// Anything that maps text to a vector of fixed dimension
#[async_trait]
pub trait Embedder: Send + Sync + Debug {
    /// Short model name, used in logs
    fn name(&self) -> &str;

    /// Output dimension
    fn dimension(&self) -> usize;

    /// Encode text. Must be deterministic for identical input.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Result of [`EmbeddingProvider::encode`]
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// Unit-length vector
    pub vector: Vec<f32>,
    /// True when produced by the fallback embedder
    pub degraded: bool,
}

/// Hash-seeded fallback embedder
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create fallback embedder with the given dimension
    #[inline]
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Synchronous encode; infallible
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        let mut rng = StdRng::from_seed(seed);
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..=1.0f32))
            .collect();
        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash-fallback"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector_for(text))
    }
}

/// Character uni/bi-gram feature-hashing embedder
///
/// Lexically similar texts get similar vectors, which is enough for ranking
/// knowledge snippets written in mixed Chinese/English.
#[derive(Debug, Clone, Copy)]
pub struct NgramEmbedder {
    dimension: usize,
}

impl NgramEmbedder {
    /// Create n-gram embedder with the given dimension
    #[inline]
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, gram: &str) -> (usize, f32) {
        let digest = blake3::hash(gram.as_bytes());
        let bytes = digest.as_bytes();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        let h = u64::from_le_bytes(raw);
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        // dimension fits in u64 on every supported target
        (usize::try_from(h % self.dimension as u64).unwrap_or(0), sign)
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for NgramEmbedder {
    fn name(&self) -> &str {
        "char-ngram"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let chars: Vec<char> = text
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if chars.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        let mut buf = String::with_capacity(8);
        for (i, c) in chars.iter().enumerate() {
            buf.clear();
            buf.push(*c);
            let (idx, sign) = self.bucket(&buf);
            vector[idx] += sign;

            if let Some(next) = chars.get(i + 1) {
                buf.push(*next);
                let (idx, sign) = self.bucket(&buf);
                vector[idx] += 1.5 * sign;
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Primary embedder with deterministic fallback and a shared cache
#[derive(Debug, Clone)]
pub struct EmbeddingProvider {
    primary: Option<Arc<dyn Embedder>>,
    fallback: HashEmbedder,
    cache: EmbeddingCache,
}

impl EmbeddingProvider {
    /// Provider with the lexical primary at the default dimension
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: Some(Arc::new(NgramEmbedder::default())),
            fallback: HashEmbedder::default(),
            cache: EmbeddingCache::default(),
        }
    }

    /// Provider with the lexical primary and fallback at `dimension`
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            primary: Some(Arc::new(NgramEmbedder::new(dimension))),
            fallback: HashEmbedder::new(dimension),
            cache: EmbeddingCache::default(),
        }
    }

    /// Provider with a custom primary model
    ///
    /// # Errors
    /// `EmbeddingError::DimensionMismatch` if the primary dimension is zero
    pub fn with_primary(primary: Arc<dyn Embedder>) -> Result<Self, EmbeddingError> {
        let dimension = primary.dimension();
        if dimension == 0 {
            return Err(EmbeddingError::DimensionMismatch {
                expected: DEFAULT_DIMENSION,
                actual: 0,
            });
        }
        Ok(Self {
            primary: Some(primary),
            fallback: HashEmbedder::new(dimension),
            cache: EmbeddingCache::default(),
        })
    }

    /// Provider that only has the fallback (no primary model available)
    #[inline]
    #[must_use]
    pub fn fallback_only(dimension: usize) -> Self {
        Self {
            primary: None,
            fallback: HashEmbedder::new(dimension),
            cache: EmbeddingCache::default(),
        }
    }

    /// Replace the cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = cache;
        self
    }

    /// Output dimension
    #[inline]
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.fallback.dimension()
    }

    /// Whether a primary model is configured
    #[inline]
    #[must_use]
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Encode text, degrading to the fallback on primary failure
    ///
    /// # Errors
    /// Never fails today; the result type leaves room for providers without a fallback.
    pub async fn encode(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let key = EmbeddingCache::key_for(text);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let embedding = match &self.primary {
            Some(primary) => match primary.encode(text).await {
                Ok(vector) if vector.len() == self.dimension() => Embedding {
                    vector,
                    degraded: false,
                },
                Ok(vector) => {
                    tracing::warn!(
                        model = primary.name(),
                        expected = self.dimension(),
                        actual = vector.len(),
                        "primary embedding has wrong dimension, using fallback"
                    );
                    self.fallback_embedding(text)
                }
                Err(e) => {
                    tracing::warn!(model = primary.name(), error = %e, "primary embedding failed, using fallback");
                    self.fallback_embedding(text)
                }
            },
            None => self.fallback_embedding(text),
        };

        self.cache.insert(key, embedding.clone()).await;
        Ok(embedding)
    }

    fn fallback_embedding(&self, text: &str) -> Embedding {
        Embedding {
            vector: self.fallback.vector_for(text),
            degraded: true,
        }
    }
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale a vector to unit length in place; zero vectors are left unchanged
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity of two equal-length vectors
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    f64::from(dot / (na * nb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct BrokenModel;

    #[async_trait]
    impl Embedder for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }
        fn dimension(&self) -> usize {
            DEFAULT_DIMENSION
        }
        async fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::ModelUnavailable("weights missing".into()))
        }
    }

    #[tokio::test]
    async fn primary_is_deterministic() {
        let provider = EmbeddingProvider::new();
        let a = provider.encode("VCU Ready模式切换").await.unwrap();
        let b = EmbeddingProvider::new().encode("VCU Ready模式切换").await.unwrap();
        assert_eq!(a, b);
        assert!(!a.degraded);
        assert_eq!(a.vector.len(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn lexical_neighbours_score_higher() {
        let e = NgramEmbedder::default();
        let q = e.encode("HIL测试 故障注入").await.unwrap();
        let near = e.encode("HIL测试中的故障注入方法").await.unwrap();
        let far = e.encode("电池包盐雾试验").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn broken_primary_degrades_to_fallback() {
        let provider = EmbeddingProvider::with_primary(Arc::new(BrokenModel)).unwrap();
        let emb = provider.encode("anything").await.unwrap();
        assert!(emb.degraded);
        assert_eq!(emb.vector, HashEmbedder::default().vector_for("anything"));
    }

    #[tokio::test]
    async fn empty_text_uses_fallback() {
        let provider = EmbeddingProvider::new();
        let emb = provider.encode("   ").await.unwrap();
        assert!(emb.degraded);
    }

    #[test]
    fn zero_vector_is_left_alone() {
        let mut v = vec![0.0f32; 4];
        normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    proptest! {
        #[test]
        fn fallback_vectors_are_unit_and_stable(text in ".{0,64}") {
            let e = HashEmbedder::new(32);
            let a = e.vector_for(&text);
            let b = e.vector_for(&text);
            prop_assert_eq!(&a, &b);
            let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
            prop_assert!((norm - 1.0).abs() < 1e-4);
        }
    }
}
