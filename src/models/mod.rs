// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
pub mod item;
pub mod record;
pub mod schema;
mod source;

// Re-export all public types
pub use config::{
    Config, EnrichmentConfig, ExtractorConfig, INDEX_URL_ENV, IndexConfig, RuntimeConfig,
};
pub use item::{MediaUrl, NormalizedItem, compute_object_id};
pub use record::RawRecord;
pub use schema::{FieldKind, FieldValue, StrictMap};
pub use source::{SourceCatalog, SourceDefinition};
