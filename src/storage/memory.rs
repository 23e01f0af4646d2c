//! In-memory index store for tests and dry runs.
//!
//! All state sits behind one mutex, so an alias update is applied entirely or
//! not at all, and create-if-absent is race-free across tasks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::storage::{AliasAction, CreateOutcome, IndexStore};

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Upsert,
    Create,
    UpdateAliases,
    DeleteIndex,
}

#[derive(Default)]
struct State {
    indices: HashMap<String, HashMap<String, Value>>,
    aliases: HashMap<String, BTreeSet<String>>,
    failures: Vec<(FailPoint, Option<String>)>,
}

impl State {
    fn check(&self, point: FailPoint, index: &str) -> Result<()> {
        let hit = self.failures.iter().any(|(p, target)| {
            *p == point && target.as_deref().is_none_or(|t| t == index)
        });
        if hit {
            Err(AppError::store(format!("injected {point:?} failure on {index}")))
        } else {
            Ok(())
        }
    }

    fn write_target(&self, name: &str) -> Result<String> {
        match self.aliases.get(name) {
            Some(targets) if targets.len() == 1 => {
                Ok(targets.iter().next().cloned().unwrap_or_default())
            }
            Some(targets) if !targets.is_empty() => Err(AppError::store(format!(
                "alias {name} points to {} indices, cannot write",
                targets.len()
            ))),
            _ => Ok(name.to_string()),
        }
    }

    fn read_targets(&self, name: &str) -> Vec<String> {
        match self.aliases.get(name) {
            Some(targets) if !targets.is_empty() => targets.iter().cloned().collect(),
            _ => vec![name.to_string()],
        }
    }
}

/// Index store kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `point` fail, for every index or only for `index`.
    pub fn fail_on(&self, point: FailPoint, index: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push((point, index.map(str::to_string)));
        }
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Whether an index (not an alias) exists.
    pub fn index_exists(&self, index: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.indices.contains_key(index))
            .unwrap_or(false)
    }

    /// Names of every concrete index, sorted.
    pub fn indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .map(|state| state.indices.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of documents in an index or behind an alias.
    pub fn count(&self, index: &str) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .read_targets(index)
                    .iter()
                    .filter_map(|name| state.indices.get(name))
                    .map(HashMap::len)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::store("memory store lock poisoned"))
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn upsert(&self, index: &str, id: &str, doc: &Value) -> Result<()> {
        let mut state = self.lock()?;
        state.check(FailPoint::Upsert, index)?;
        let target = state.write_target(index)?;
        state
            .indices
            .entry(target)
            .or_default()
            .insert(id.to_string(), doc.clone());
        Ok(())
    }

    async fn create(&self, index: &str, id: &str, doc: &Value) -> Result<CreateOutcome> {
        let mut state = self.lock()?;
        state.check(FailPoint::Create, index)?;
        let target = state.write_target(index)?;
        let docs = state.indices.entry(target).or_default();
        if docs.contains_key(id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        docs.insert(id.to_string(), doc.clone());
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let state = self.lock()?;
        Ok(state
            .read_targets(index)
            .iter()
            .filter_map(|name| state.indices.get(name))
            .find_map(|docs| docs.get(id).cloned()))
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(AppError::store(format!("index {index} already exists")));
        }
        state.indices.insert(index.to_string(), HashMap::new());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check(FailPoint::DeleteIndex, index)?;
        if state.indices.remove(index).is_none() {
            return Err(AppError::store(format!("index {index} not found")));
        }
        for targets in state.aliases.values_mut() {
            targets.remove(index);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.lock()?;
        for action in actions {
            match action {
                AliasAction::Add { index, .. } | AliasAction::Remove { index, .. } => {
                    state.check(FailPoint::UpdateAliases, index)?;
                }
            }
        }

        // Validate everything before touching state.
        let mut aliases = state.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !state.indices.contains_key(index) {
                        return Err(AppError::store(format!("index {index} not found")));
                    }
                    aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    let removed = aliases
                        .get_mut(alias)
                        .is_some_and(|targets| targets.remove(index));
                    if !removed {
                        return Err(AppError::store(format!(
                            "alias {alias} does not point to {index}"
                        )));
                    }
                }
            }
        }
        aliases.retain(|_, targets| !targets.is_empty());
        state.aliases = aliases;
        Ok(())
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }
}
