//! JSON export/import
//!
//! Format: `{ "metadata": { export_time, total_items, counts_by_type }, "items": [...] }`.
//! Import is upsert-by-id. Items that fail validation (unknown type, blank
//! content) are skipped and counted rather than aborting the import.

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::item::KnowledgeItem;
use crate::store::KnowledgeStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Export header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_time: DateTime<Utc>,
    pub total_items: usize,
    pub counts_by_type: BTreeMap<String, usize>,
}

/// Whole export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub items: Vec<KnowledgeItem>,
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    items: Vec<Value>,
}

impl KnowledgeStore {
    /// Snapshot every item
    #[must_use]
    pub fn export(&self) -> ExportDocument {
        let items = self.list(&crate::SearchFilter::new());
        let stats = self.stats();
        ExportDocument {
            metadata: ExportMetadata {
                export_time: Utc::now(),
                total_items: items.len(),
                counts_by_type: stats.counts_by_type,
            },
            items,
        }
    }

    /// Export as pretty JSON
    ///
    /// # Errors
    /// Serialization failure
    pub fn export_json(&self) -> KnowledgeResult<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Export to a file, returning the number of items written
    ///
    /// # Errors
    /// Serialization or IO failure
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> KnowledgeResult<usize> {
        let path = path.as_ref();
        let doc = self.export();
        let json = serde_json::to_string_pretty(&doc)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KnowledgeError::io_error(parent, e))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| KnowledgeError::io_error(path, e))?;
        tracing::info!(path = %path.display(), items = doc.items.len(), "exported knowledge");
        Ok(doc.items.len())
    }

    /// Import a JSON document, upserting by id
    ///
    /// Existing ids keep their `created_at` and usage statistics; content and
    /// metadata are replaced.
    ///
    /// # Errors
    /// - `KnowledgeError::Serialization` if the document itself is not JSON
    /// - `KnowledgeError::Consistency` if a semantic write fails
    pub async fn import_json(&self, json: &str) -> KnowledgeResult<ImportReport> {
        let raw: RawDocument = serde_json::from_str(json)?;
        let mut report = ImportReport::default();

        for value in raw.items {
            let mut item: KnowledgeItem = match serde_json::from_value(value) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping invalid knowledge item");
                    report.skipped += 1;
                    continue;
                }
            };
            if item.content.trim().is_empty() {
                tracing::warn!(id = %item.id, "skipping knowledge item with empty content");
                report.skipped += 1;
                continue;
            }

            if let Some(existing) = self.get(&item.id) {
                item.created_at = existing.created_at;
                item.usage_count = existing.usage_count;
                item.success_rate = existing.success_rate;
                item.updated_at = Utc::now();
            }
            item.tags = crate::item::dedup_tags(std::mem::take(&mut item.tags).into_iter());

            if self.upsert(item).await? {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "imported knowledge"
        );
        Ok(report)
    }

    /// Import from a file
    ///
    /// # Errors
    /// IO failure or the errors of [`KnowledgeStore::import_json`]
    pub async fn import_from_file(&self, path: impl AsRef<Path>) -> KnowledgeResult<ImportReport> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KnowledgeError::io_error(path, e))?;
        self.import_json(&json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{KnowledgeType, NewKnowledge};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn export_counts_types() {
        let store = KnowledgeStore::default();
        store
            .add(NewKnowledge::new("a", KnowledgeType::Standard, "d"))
            .await
            .unwrap();
        store
            .add(NewKnowledge::new("b", KnowledgeType::Controller, "d"))
            .await
            .unwrap();

        let doc = store.export();
        assert_eq!(doc.metadata.total_items, 2);
        assert_eq!(doc.metadata.counts_by_type.get("standard"), Some(&1));
    }

    #[tokio::test]
    async fn import_upserts_by_id() {
        let source = KnowledgeStore::default();
        let id = source
            .add(NewKnowledge::new("原始内容", KnowledgeType::BestPractice, "HIL测试"))
            .await
            .unwrap();
        let json = source.export_json().unwrap();

        let target = KnowledgeStore::default();
        let first = target.import_json(&json).await.unwrap();
        assert_eq!(first, ImportReport { inserted: 1, updated: 0, skipped: 0 });

        target.record_usage(&id, true).unwrap();
        let second = target.import_json(&json).await.unwrap();
        assert_eq!(second, ImportReport { inserted: 0, updated: 1, skipped: 0 });
        assert_eq!(target.len(), 1);
        assert_eq!(target.get(&id).unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn invalid_items_are_skipped() {
        let json = r#"{
            "metadata": {},
            "items": [
                {"id": "x", "content": "c", "type": "recipe", "domain": "d",
                 "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"},
                {"id": "y", "content": "有效", "type": "standard", "domain": "d",
                 "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}
            ]
        }"#;
        let store = KnowledgeStore::default();
        let report = store.import_json(json).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert!(store.get("y").is_some());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb").join("export.json");

        let store = KnowledgeStore::default();
        store.seed_initial_knowledge().await.unwrap();
        let written = store.export_to_file(&path).await.unwrap();

        let restored = KnowledgeStore::default();
        let report = restored.import_from_file(&path).await.unwrap();
        assert_eq!(report.inserted, written);
        assert_eq!(restored.len(), store.len());
    }
}
