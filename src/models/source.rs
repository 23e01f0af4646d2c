//! Source definitions: the static description of one harvestable source.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Static, read-only description of one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Stable identifier, part of every object id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Extractor registry name (e.g. `oai_pmh`, `json_offset`)
    pub extractor: String,

    /// Normalizer registry name
    #[serde(default = "defaults::normalizer")]
    pub normalizer: String,

    /// Loader registry name
    #[serde(default = "defaults::loader")]
    pub loader: String,

    /// Enrichment stages, run in this order
    #[serde(default)]
    pub enrichers: Vec<String>,

    /// Cleanup action run after every load, success or failure
    #[serde(default)]
    pub cleanup: Option<String>,

    /// Per-source index (or alias, for blue-green harvests)
    pub index_name: String,

    /// Rights statement copied to `meta.rights`
    #[serde(default)]
    pub rights: String,

    /// Object types copied to `meta.object_types`
    #[serde(default)]
    pub object_types: Vec<String>,

    /// Collection name, copied into the source document
    #[serde(default)]
    pub collection: String,

    /// Endpoint of the remote listing
    #[serde(default)]
    pub base_url: String,

    /// Extractor-specific parameters
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Field mapping for the `mapped` normalizer (field -> JSON pointer)
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

impl SourceDefinition {
    /// Read a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Read an unsigned integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// Read a boolean parameter.
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// Read a string parameter that the extractor cannot work without.
    pub fn require_param(&self, key: &str) -> Result<&str> {
        self.param_str(key).ok_or_else(|| {
            AppError::config(format!("source {} is missing params.{}", self.id, key))
        })
    }
}

/// All source definitions known to the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCatalog {
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

impl SourceCatalog {
    /// Load source definitions from a TOML file with a `[[sources]]` array.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Find a source by id.
    pub fn get(&self, id: &str) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Check ids are present and unique, and required names are set.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(AppError::validation("source with empty id"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source id: {}",
                    source.id
                )));
            }
            if source.index_name.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "source {} has empty index_name",
                    source.id
                )));
            }
            if source.extractor.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "source {} has no extractor",
                    source.id
                )));
            }
        }
        Ok(())
    }
}

mod defaults {
    pub fn normalizer() -> String {
        "mapped".into()
    }
    pub fn loader() -> String {
        "index".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: &str = r#"
        [[sources]]
        id = "museum_x"
        name = "Museum X"
        extractor = "oai_pmh"
        enrichers = ["media"]
        cleanup = "progress"
        index_name = "museum_x"
        base_url = "http://museum.example/oai"
        rights = "CC0"

        [sources.params]
        metadata_prefix = "oai_dc"
        page_size = 50

        [sources.mapping]
        title = "/record/metadata/title/#text"
        original_object_id = "/record/header/identifier/#text"

        [[sources]]
        id = "archive_y"
        extractor = "json_offset"
        index_name = "archive_y"
    "#;

    #[test]
    fn test_parse_catalog() {
        let catalog: SourceCatalog = toml::from_str(SOURCES).unwrap();
        assert_eq!(catalog.sources.len(), 2);

        let museum = catalog.get("museum_x").unwrap();
        assert_eq!(museum.normalizer, "mapped");
        assert_eq!(museum.loader, "index");
        assert_eq!(museum.enrichers, vec!["media".to_string()]);
        assert_eq!(museum.param_str("metadata_prefix"), Some("oai_dc"));
        assert_eq!(museum.param_u64("page_size"), Some(50));
        assert_eq!(
            museum.mapping.get("title").map(String::as_str),
            Some("/record/metadata/title/#text")
        );
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut catalog: SourceCatalog = toml::from_str(SOURCES).unwrap();
        catalog.sources[1].id = "museum_x".into();
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_missing_required_param() {
        let catalog: SourceCatalog = toml::from_str(SOURCES).unwrap();
        let archive = catalog.get("archive_y").unwrap();
        assert!(archive.require_param("records_pointer").is_err());
    }
}
