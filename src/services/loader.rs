// src/services/loader.rs

//! Loading documents and media resolver entries into the index store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{AppError, Result};
use crate::models::MediaUrl;
use crate::models::item::document_media_urls;
use crate::storage::{CreateOutcome, IndexStore};

/// Index names one item is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub combined_index: String,
    pub source_index: String,
    pub resolver_index: String,
}

/// Resolver bookkeeping of one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub resolver_created: usize,
    pub resolver_existing: usize,
}

/// Writes an item's documents. Loading the same item twice must be safe.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(
        &self,
        target: &LoadTarget,
        object_id: &str,
        combined_doc: &Value,
        source_doc: &Value,
    ) -> Result<LoadReport>;
}

/// Content type for a media URL: enrichment output first, then the
/// normalizer's hint.
fn resolver_content_type(media: &MediaUrl, source_doc: &Value) -> Option<String> {
    source_doc
        .pointer("/enrichments/media_urls")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries
                .iter()
                .find(|e| {
                    e.get("original_url").and_then(Value::as_str)
                        == Some(media.original_url.as_str())
                })
        })
        .and_then(|e| e.get("content_type"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| media.content_type.clone())
}

/// Resolver entry for one media asset, keyed by its URL hash.
pub fn resolver_entry(media: &MediaUrl, content_type: Option<String>) -> Value {
    let mut entry = Map::new();
    entry.insert("original_url".into(), json!(media.original_url));
    if let Some(content_type) = content_type {
        entry.insert("content_type".into(), json!(content_type));
    }
    Value::Object(entry)
}

/// Loader writing to an [`IndexStore`].
pub struct IndexLoader {
    store: Arc<dyn IndexStore>,
}

impl IndexLoader {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Loader for IndexLoader {
    async fn load(
        &self,
        target: &LoadTarget,
        object_id: &str,
        combined_doc: &Value,
        source_doc: &Value,
    ) -> Result<LoadReport> {
        self.store
            .upsert(&target.combined_index, object_id, combined_doc)
            .await
            .map_err(|e| AppError::load(object_id, format!("{}: {}", target.combined_index, e)))?;
        self.store
            .upsert(&target.source_index, object_id, source_doc)
            .await
            .map_err(|e| AppError::load(object_id, format!("{}: {}", target.source_index, e)))?;

        let mut report = LoadReport::default();
        for media in document_media_urls(source_doc) {
            let hash = media.url_hash();
            let entry = resolver_entry(&media, resolver_content_type(&media, source_doc));
            match self.store.create(&target.resolver_index, &hash, &entry).await {
                Ok(CreateOutcome::Created) => report.resolver_created += 1,
                Ok(CreateOutcome::AlreadyExists) => report.resolver_existing += 1,
                Err(e) => log::warn!(
                    "resolver entry {} for {} not created: {}",
                    hash,
                    object_id,
                    e
                ),
            }
        }

        Ok(report)
    }
}
