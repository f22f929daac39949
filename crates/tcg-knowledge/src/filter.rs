//! Search filters shared by the semantic and structured indexes

use crate::item::{KnowledgeItem, KnowledgeType};

/// Default number of results returned by a search
pub const DEFAULT_TOP_K: usize = 5;

/// Query filter for [`crate::KnowledgeStore::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    /// Types to search; `None` searches every collection
    pub types: Option<Vec<KnowledgeType>>,
    /// Domain allow-list
    pub domains: Option<Vec<String>>,
    /// Items must carry at least one of these tags
    pub tags: Option<Vec<String>>,
    /// Maximum results after merging
    pub top_k: usize,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            types: None,
            domains: None,
            tags: None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = KnowledgeType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    pub fn with_type(self, kind: KnowledgeType) -> Self {
        self.with_types([kind])
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Types to search, all types when unset
    #[must_use]
    pub fn selected_types(&self) -> Vec<KnowledgeType> {
        match &self.types {
            Some(types) if !types.is_empty() => types.clone(),
            _ => KnowledgeType::ALL.to_vec(),
        }
    }

    /// Metadata-only check used by both indexes
    #[must_use]
    pub fn matches_metadata(&self, domain: &str, tags: &[String]) -> bool {
        if let Some(ref domains) = self.domains {
            if !domains.is_empty() && !domains.iter().any(|d| d == domain) {
                return false;
            }
        }

        if let Some(ref wanted) = self.tags {
            if !wanted.is_empty() && !wanted.iter().any(|w| tags.contains(w)) {
                return false;
            }
        }

        true
    }

    /// Check if an item matches this filter
    #[must_use]
    pub fn matches(&self, item: &KnowledgeItem) -> bool {
        if let Some(ref types) = self.types {
            if !types.is_empty() && !types.contains(&item.kind) {
                return false;
            }
        }
        self.matches_metadata(&item.domain, &item.tags)
    }
}
