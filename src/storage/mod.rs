//! Index store abstractions.
//!
//! The pipeline writes to an external, Elasticsearch-like document store.
//! It needs exactly these operations:
//!
//! - idempotent upsert by id (combined and per-source documents)
//! - create-by-id that reports, rather than fails on, an existing id
//!   (media resolver entries)
//! - an atomic multi-action alias update (index cutover)
//! - index creation and deletion
//!
//! Writes addressed to an alias go to the single index behind it.

pub mod elasticsearch;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

// Re-export for convenience
pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryStore;

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// One step of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }
}

/// Trait for document index backends.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or overwrite the document stored under `id`.
    async fn upsert(&self, index: &str, id: &str, doc: &Value) -> Result<()>;

    /// Insert the document only if `id` is not taken yet.
    async fn create(&self, index: &str, id: &str, doc: &Value) -> Result<CreateOutcome>;

    /// Fetch a stored document.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Create an empty index.
    async fn create_index(&self, index: &str) -> Result<()>;

    /// Delete an index and every alias pointing at it.
    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Apply all actions in a single atomic request.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    /// Indices the alias currently points to.
    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>>;
}
