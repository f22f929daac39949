//! Structured index: source of truth for item identity and usage statistics
//!
//! Backed by a `DashMap`. Mutable access to one entry holds that entry's shard
//! lock, so concurrent [`StructuredIndex::record_usage`] calls on the same id
//! are serialized while reads of other ids proceed.

use crate::filter::SearchFilter;
use crate::item::{KnowledgeItem, KnowledgeType};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate statistics over the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_items: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub total_usage: u64,
}

/// Exact-lookup index over knowledge items
#[derive(Debug, Default)]
pub struct StructuredIndex {
    items: DashMap<String, KnowledgeItem>,
}

impl StructuredIndex {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace
    pub fn put(&self, item: KnowledgeItem) -> Option<KnowledgeItem> {
        self.items.insert(item.id.clone(), item)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<KnowledgeItem> {
        self.items.get(id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<KnowledgeItem> {
        self.items.remove(id).map(|(_, item)| item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items matching the filter, oldest first
    #[must_use]
    pub fn select(&self, filter: &SearchFilter) -> Vec<KnowledgeItem> {
        let mut items: Vec<KnowledgeItem> = self
            .items
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    #[must_use]
    pub fn by_type(&self, kind: KnowledgeType) -> Vec<KnowledgeItem> {
        self.select(&SearchFilter::new().with_type(kind))
    }

    #[must_use]
    pub fn by_domain(&self, domain: &str) -> Vec<KnowledgeItem> {
        self.select(&SearchFilter::new().with_domains([domain]))
    }

    /// Update usage statistics with the incremental average
    /// `new_rate = (old_rate * (n - 1) + s) / n`.
    ///
    /// Returns the updated item, or `None` if the id is unknown.
    pub fn record_usage(&self, id: &str, success: bool) -> Option<KnowledgeItem> {
        let mut entry = self.items.get_mut(id)?;
        let item = entry.value_mut();
        item.usage_count += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = item.usage_count as f64;
        let s = if success { 1.0 } else { 0.0 };
        item.success_rate = (item.success_rate * (n - 1.0) + s) / n;
        item.updated_at = Utc::now();
        Some(item.clone())
    }

    /// Substring scan scored by keyword hit density:
    /// `occurrences(query) / max(1, words(query))`, capped at 1.
    #[must_use]
    pub fn keyword_scan(&self, query: &str, filter: &SearchFilter) -> Vec<(KnowledgeItem, f64)> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let words = needle.split_whitespace().count().max(1);

        let mut scored: Vec<(KnowledgeItem, f64)> = self
            .select(filter)
            .into_iter()
            .filter_map(|item| {
                let hits = item.content.to_lowercase().matches(needle.as_str()).count();
                if hits == 0 {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let score = (hits as f64 / words as f64).min(1.0);
                Some((item, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(filter.top_k);
        scored
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        let mut confidence_sum = 0.0;
        for r in &self.items {
            let item = r.value();
            *stats
                .counts_by_type
                .entry(item.kind.as_str().to_string())
                .or_default() += 1;
            confidence_sum += item.confidence;
            stats.total_usage += item.usage_count;
        }
        stats.total_items = self.items.len();
        if stats.total_items > 0 {
            #[allow(clippy::cast_precision_loss)]
            let n = stats.total_items as f64;
            stats.average_confidence = confidence_sum / n;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewKnowledge;
    use proptest::prelude::*;

    fn put(index: &StructuredIndex, id: &str, content: &str) {
        index.put(
            NewKnowledge::new(content, KnowledgeType::BestPractice, "HIL测试")
                .into_item(id.to_string(), Utc::now()),
        );
    }

    #[test]
    fn all_successes_give_rate_one() {
        let index = StructuredIndex::new();
        put(&index, "a", "x");
        for _ in 0..7 {
            index.record_usage("a", true);
        }
        let item = index.get("a").unwrap();
        assert_eq!(item.usage_count, 7);
        assert!((item.success_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_id_is_none() {
        let index = StructuredIndex::new();
        assert!(index.record_usage("missing", true).is_none());
    }

    #[test]
    fn keyword_scan_scores_density() {
        let index = StructuredIndex::new();
        put(&index, "a", "故障注入 故障注入 测试");
        put(&index, "b", "信号模拟");
        let hits = index.keyword_scan("故障注入", &SearchFilter::new());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "a");
        assert!((hits[0].1 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_count_types() {
        let index = StructuredIndex::new();
        put(&index, "a", "x");
        put(&index, "b", "y");
        let stats = index.stats();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.counts_by_type.get("best_practice"), Some(&2));
    }

    proptest! {
        #[test]
        fn success_rate_matches_closed_form(outcomes in proptest::collection::vec(any::<bool>(), 1..60)) {
            let index = StructuredIndex::new();
            put(&index, "a", "x");
            for ok in &outcomes {
                index.record_usage("a", *ok);
            }
            let item = index.get("a").unwrap();
            let expected = outcomes.iter().filter(|b| **b).count() as f64 / outcomes.len() as f64;
            prop_assert_eq!(item.usage_count, outcomes.len() as u64);
            prop_assert!((item.success_rate - expected).abs() < 1e-9);
        }
    }
}
