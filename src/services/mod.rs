//! Service layer for the harvester.
//!
//! This module contains the per-record work of a harvest:
//! - Paged extraction with bounded retry (`Extractor`, `Harvest`)
//! - Built-in cursor protocols (`protocols`)
//! - Decoding and normalization (`MappedNormalizer`)
//! - Enrichment stages (`MediaEnricher`)
//! - Loading into the index store (`IndexLoader`)

pub mod enrichment;
pub mod extractor;
pub mod fetch;
pub mod loader;
pub mod normalizer;
pub mod protocols;

pub use enrichment::{EnrichmentStage, MediaEnricher, StageOutcome, run_stage};
pub use extractor::{Cursor, CursorProtocol, Extractor, Harvest, HarvestStats, RetryPolicy};
pub use fetch::{FileFetcher, HttpFetcher, PageFetcher, PageRequest, Transport};
pub use loader::{IndexLoader, LoadReport, LoadTarget, Loader};
pub use normalizer::{MappedNormalizer, Normalizer};
