//! Initial knowledge shipped with a fresh store

use crate::error::KnowledgeResult;
use crate::item::{KnowledgeType, NewKnowledge};
use crate::store::KnowledgeStore;
use serde_json::json;

/// The three seed items: HIL best practice, VCU controller facts, fault-injection pattern
#[must_use]
pub fn initial_knowledge() -> Vec<NewKnowledge> {
    vec![
        NewKnowledge::new(
            "HIL测试（硬件在环测试）是通过实时仿真器模拟车辆环境，验证控制器软件的正确性。",
            KnowledgeType::BestPractice,
            "HIL测试",
        )
        .with_tags(["基础概念", "测试方法", "硬件在环"])
        .with_source("行业最佳实践")
        .with_extra("category", "concept")
        .with_extra("complexity", "low"),
        NewKnowledge::new(
            "VCU（整车控制器）主要负责整车模式管理、扭矩分配、能量回收控制、热管理控制等功能。",
            KnowledgeType::Controller,
            "VCU",
        )
        .with_tags(["功能说明", "控制器", "整车控制", "VCU"])
        .with_source("技术文档")
        .with_extra("category", "function")
        .with_extra("name", "VCU基本功能"),
        NewKnowledge::new(
            "故障注入测试步骤：1.设置正常工况 2.注入故障信号 3.监控系统响应 4.验证安全机制 5.恢复系统状态。",
            KnowledgeType::TestPattern,
            "安全测试",
        )
        .with_tags(["测试模式", "故障注入", "安全测试"])
        .with_source("测试经验")
        .with_extra("name", "故障注入测试模式")
        .with_extra("steps", json!(5))
        .with_extra("success_rate", json!(0.95)),
    ]
}

impl KnowledgeStore {
    /// Add the seed items, returning their ids
    ///
    /// # Errors
    /// Propagates [`KnowledgeStore::add`] failures
    pub async fn seed_initial_knowledge(&self) -> KnowledgeResult<Vec<String>> {
        let mut ids = Vec::new();
        for item in initial_knowledge() {
            ids.push(self.add(item).await?);
        }
        tracing::info!(count = ids.len(), "seeded initial knowledge");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SearchFilter;

    #[tokio::test]
    async fn seed_items_are_searchable() {
        let store = KnowledgeStore::default();
        let ids = store.seed_initial_knowledge().await.unwrap();
        assert_eq!(ids.len(), 3);

        let hits = store
            .search("测试", &SearchFilter::new().with_top_k(3))
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }
}
