//! TCG Knowledge - hybrid knowledge store
//!
//! Reusable domain knowledge (standards, best practices, test patterns,
//! case templates, controllers, equipment) held in two indexes:
//! - a structured index: identity, exact lookup, usage statistics
//! - a semantic index: per-type vector collections with metadata filters
//!
//! # Example
//!
//! ```rust,ignore
//! use tcg_knowledge::{KnowledgeStore, KnowledgeType, NewKnowledge, SearchFilter};
//!
//! # async fn example() -> Result<(), tcg_knowledge::KnowledgeError> {
//! let store = KnowledgeStore::default();
//! let id = store
//!     .add(NewKnowledge::new("HIL测试需要实时仿真器", KnowledgeType::BestPractice, "HIL测试"))
//!     .await?;
//!
//! let hits = store.search("实时仿真", &SearchFilter::new().with_top_k(3)).await?;
//! store.record_usage(&id, true)?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod index;
pub mod item;
pub mod seed;
pub mod store;
pub mod structured;
pub mod transfer;

pub use cache::{CacheStats, EmbeddingCache};
pub use embedding::{
    Embedder, Embedding, EmbeddingProvider, HashEmbedder, NgramEmbedder, DEFAULT_DIMENSION,
};
pub use error::{EmbeddingError, IndexError, KnowledgeError, KnowledgeResult};
pub use filter::{SearchFilter, DEFAULT_TOP_K};
pub use index::{InMemoryVectorIndex, SemanticIndex, VectorHit, VectorRecord};
pub use item::{KnowledgeItem, KnowledgeType, NewKnowledge};
pub use store::{KnowledgeStore, RetrievalMethod, SearchHit, StoreConfig};
pub use structured::StoreStats;
pub use transfer::{ExportDocument, ExportMetadata, ImportReport};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the knowledge store
    pub use crate::{
        KnowledgeError, KnowledgeItem, KnowledgeStore, KnowledgeType, NewKnowledge,
        SearchFilter, SearchHit,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
