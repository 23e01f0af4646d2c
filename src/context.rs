// src/context.rs

//! Process-wide context, built once at startup and passed down.

use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::registry::Registry;
use crate::storage::{ElasticsearchStore, IndexStore};

pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn IndexStore>,
    pub registry: Registry,
}

impl AppContext {
    /// Context writing to the store at `config.index.url`.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn IndexStore> = Arc::new(ElasticsearchStore::from_config(&config.index)?);
        Self::with_store(config, store)
    }

    /// Context writing to a given store.
    pub fn with_store(config: Config, store: Arc<dyn IndexStore>) -> Result<Self> {
        let registry = Registry::new(&config, Arc::clone(&store))?;
        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
        })
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }
}
