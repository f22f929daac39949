//! Knowledge items and their types
//!
//! A [`KnowledgeItem`] is immutable after creation apart from its usage
//! statistics, which only the store mutates.

use crate::error::KnowledgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of knowledge, each stored in its own semantic collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    /// Standard excerpt (ISO 26262, GB/T ...)
    Standard,
    /// Engineering best practice
    BestPractice,
    /// Reusable test pattern
    TestPattern,
    /// Learned or imported case template
    CaseTemplate,
    /// Test equipment fact
    Equipment,
    /// Controller fact
    Controller,
}

impl KnowledgeType {
    /// Every type, in collection order
    pub const ALL: [Self; 6] = [
        Self::Standard,
        Self::BestPractice,
        Self::TestPattern,
        Self::CaseTemplate,
        Self::Controller,
        Self::Equipment,
    ];

    /// Wire name of the type
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::BestPractice => "best_practice",
            Self::TestPattern => "test_pattern",
            Self::CaseTemplate => "case_template",
            Self::Equipment => "equipment",
            Self::Controller => "controller",
        }
    }

    /// Semantic collection holding items of this type.
    ///
    /// The mapping is injective: no two types share a collection.
    #[inline]
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Standard => "standards",
            Self::BestPractice => "best_practices",
            Self::TestPattern => "test_patterns",
            Self::CaseTemplate => "case_templates",
            Self::Controller => "controllers",
            Self::Equipment => "equipment",
        }
    }
}

impl fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeType {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KnowledgeError::InvalidType(s.to_string()))
    }
}

/// One reusable unit of domain knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Stable identity shared by both indexes
    pub id: String,
    /// Text content
    pub content: String,
    /// Knowledge type
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
    /// Free-form domain (e.g. "HIL测试")
    pub domain: String,
    /// Ordered, duplicate-free tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where the item came from
    #[serde(default)]
    pub source: String,
    /// Stored confidence (0..1)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Open key/value extras
    #[serde(default, alias = "metadata")]
    pub extra: Map<String, Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Number of recorded uses
    #[serde(default)]
    pub usage_count: u64,
    /// Running success rate over recorded uses
    #[serde(default)]
    pub success_rate: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl KnowledgeItem {
    /// Whether any tag contains `needle` as a substring
    #[must_use]
    pub fn tag_contains(&self, needle: &str) -> bool {
        self.tags.iter().any(|t| t.contains(needle))
    }
}

/// Builder for a knowledge item that is not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewKnowledge {
    pub content: String,
    pub kind: KnowledgeType,
    pub domain: String,
    pub tags: Vec<String>,
    pub source: String,
    pub confidence: f64,
    pub extra: Map<String, Value>,
}

impl NewKnowledge {
    /// Create new knowledge with required fields
    #[inline]
    #[must_use]
    pub fn new(content: impl Into<String>, kind: KnowledgeType, domain: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            domain: domain.into(),
            tags: Vec::new(),
            source: "manual".to_string(),
            confidence: 1.0,
            extra: Map::new(),
        }
    }

    /// Set tags; duplicates are dropped, first occurrence keeps its position
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = dedup_tags(tags.into_iter().map(Into::into));
        self
    }

    /// Set source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set confidence (clamped to 0..1)
    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add one extra key/value
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Materialize into a stored item with the given id and timestamp
    #[must_use]
    pub fn into_item(self, id: String, now: DateTime<Utc>) -> KnowledgeItem {
        KnowledgeItem {
            id,
            content: self.content,
            kind: self.kind,
            domain: self.domain,
            tags: self.tags,
            source: self.source,
            confidence: self.confidence,
            extra: self.extra,
            created_at: now,
            updated_at: now,
            usage_count: 0,
            success_rate: 0.0,
        }
    }
}

pub(crate) fn dedup_tags(tags: impl Iterator<Item = String>) -> Vec<String> {
    let set: indexmap::IndexSet<String> = tags.filter(|t| !t.is_empty()).collect();
    set.into_iter().collect()
}

/// Derive the item id: `{type}_{YYYYmmddHHMMSS}_{hash mod 10000}`
#[must_use]
pub fn derive_id(kind: KnowledgeType, content: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{:04}",
        kind.as_str(),
        now.format("%Y%m%d%H%M%S"),
        content_hash(content) % 10_000
    )
}

/// Stable 64-bit content hash
#[must_use]
pub fn content_hash(content: &str) -> u64 {
    let digest = blake3::hash(content.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
