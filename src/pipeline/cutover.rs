// src/pipeline/cutover.rs

//! Zero-downtime index cutover.
//!
//! The alias is repointed in one store request; old generations are deleted
//! only after that request succeeded.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::storage::{AliasAction, IndexStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoverState {
    Active,
    CutoverComplete,
}

/// Old and new generation behind one alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGeneration {
    pub alias: String,
    /// Indices the alias points to now (empty on the first generation)
    pub old_indices: Vec<String>,
    pub new_index: String,
}

impl IndexGeneration {
    pub fn new(
        alias: impl Into<String>,
        old_index: impl Into<String>,
        new_index: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            old_indices: vec![old_index.into()],
            new_index: new_index.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoverReport {
    pub alias: String,
    pub new_index: String,
    /// Old generations that are gone
    pub deleted: Vec<String>,
    /// Old generations that could not be deleted and are left behind
    pub retained: Vec<String>,
}

impl CutoverReport {
    pub fn old_deleted(&self) -> bool {
        self.retained.is_empty()
    }
}

pub struct CutoverController {
    store: Arc<dyn IndexStore>,
    generation: IndexGeneration,
    state: CutoverState,
}

impl CutoverController {
    pub fn new(store: Arc<dyn IndexStore>, generation: IndexGeneration) -> Self {
        Self {
            store,
            generation,
            state: CutoverState::Active,
        }
    }

    pub fn state(&self) -> CutoverState {
        self.state
    }

    pub fn generation(&self) -> &IndexGeneration {
        &self.generation
    }

    /// Repoint the alias, then delete the old generations.
    ///
    /// A failed repoint leaves every index and the alias untouched and the
    /// controller `Active`, so the call can be retried.
    pub async fn cutover(&mut self) -> Result<CutoverReport> {
        let IndexGeneration {
            alias,
            old_indices,
            new_index,
        } = &self.generation;

        if self.state == CutoverState::CutoverComplete {
            return Err(AppError::cutover(alias.as_str(), "cutover already complete"));
        }
        if old_indices.iter().any(|old| old == new_index) {
            return Err(AppError::cutover(
                alias.as_str(),
                format!("new index {new_index} is also an old generation"),
            ));
        }

        let mut actions: Vec<AliasAction> = old_indices
            .iter()
            .map(|old| AliasAction::remove(old.as_str(), alias.as_str()))
            .collect();
        actions.push(AliasAction::add(new_index.as_str(), alias.as_str()));

        self.store
            .update_aliases(&actions)
            .await
            .map_err(|e| AppError::cutover(alias.as_str(), e))?;
        self.state = CutoverState::CutoverComplete;
        log::info!("alias {alias} now points to {new_index}");

        let mut report = CutoverReport {
            alias: alias.clone(),
            new_index: new_index.clone(),
            deleted: Vec::new(),
            retained: Vec::new(),
        };
        for old in old_indices {
            match self.store.delete_index(old).await {
                Ok(()) => {
                    log::info!("deleted old generation {old}");
                    report.deleted.push(old.clone());
                }
                Err(e) => {
                    log::warn!("old generation {old} not deleted: {e}");
                    report.retained.push(old.clone());
                }
            }
        }
        Ok(report)
    }
}

/// Cut `alias` over from `old_index` to `new_index`.
pub async fn cutover(
    store: Arc<dyn IndexStore>,
    old_index: &str,
    new_index: &str,
    alias: &str,
) -> Result<CutoverReport> {
    CutoverController::new(store, IndexGeneration::new(alias, old_index, new_index))
        .cutover()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::storage::MemoryStore;
    use crate::storage::memory::FailPoint;

    async fn two_generations() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_index("items_1").await.unwrap();
        store.create_index("items_2").await.unwrap();
        store
            .update_aliases(&[AliasAction::add("items_1", "items")])
            .await
            .unwrap();
        store.upsert("items", "a", &json!({"gen": 1})).await.unwrap();
        store.upsert("items_2", "a", &json!({"gen": 2})).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_cutover_repoints_then_deletes() {
        let store = two_generations().await;
        let mut controller = CutoverController::new(
            store.clone(),
            IndexGeneration::new("items", "items_1", "items_2"),
        );

        let report = controller.cutover().await.unwrap();
        assert!(report.old_deleted());
        assert_eq!(controller.state(), CutoverState::CutoverComplete);
        assert_eq!(store.alias_targets("items").await.unwrap(), vec!["items_2"]);
        assert!(!store.index_exists("items_1"));
        assert_eq!(store.get("items", "a").await.unwrap(), Some(json!({"gen": 2})));
    }

    #[tokio::test]
    async fn test_failed_repoint_keeps_old_generation() {
        let store = two_generations().await;
        store.fail_on(FailPoint::UpdateAliases, None);
        let mut controller = CutoverController::new(
            store.clone(),
            IndexGeneration::new("items", "items_1", "items_2"),
        );

        let err = controller.cutover().await.unwrap_err();
        assert!(matches!(err, AppError::Cutover { .. }));
        assert_eq!(controller.state(), CutoverState::Active);
        assert!(store.index_exists("items_1"));
        assert_eq!(store.alias_targets("items").await.unwrap(), vec!["items_1"]);

        // Retry once the store recovers.
        store.clear_failures();
        assert!(controller.cutover().await.is_ok());
        assert_eq!(store.alias_targets("items").await.unwrap(), vec!["items_2"]);
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported_not_fatal() {
        let store = two_generations().await;
        store.fail_on(FailPoint::DeleteIndex, Some("items_1"));

        let report = cutover(store.clone(), "items_1", "items_2", "items")
            .await
            .unwrap();
        assert!(!report.old_deleted());
        assert_eq!(report.retained, vec!["items_1"]);
        assert_eq!(store.alias_targets("items").await.unwrap(), vec!["items_2"]);
    }

    #[tokio::test]
    async fn test_second_cutover_is_rejected() {
        let store = two_generations().await;
        let mut controller = CutoverController::new(
            store.clone(),
            IndexGeneration::new("items", "items_1", "items_2"),
        );
        controller.cutover().await.unwrap();
        assert!(controller.cutover().await.is_err());
    }
}
