// src/registry.rs

//! Symbolic component names mapped to built-in implementations.
//!
//! Sources name their extractor, normalizer, enrichers, loader and cleanup
//! action. Names are resolved once before a harvest starts; an unknown name
//! is an [`AppError::Registry`] error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Config, SourceDefinition};
use crate::pipeline::chain::ChainPlan;
use crate::pipeline::cleanup::{CleanupAction, LogCleanup, ProgressCleanup};
use crate::services::enrichment::{ImageDimensionsTask, MediaTypeTask};
use crate::services::protocols::{JsonCursor, JsonLines, JsonOffset, OaiPmh};
use crate::services::{
    CursorProtocol, EnrichmentStage, Extractor, FileFetcher, HttpFetcher, IndexLoader, LoadTarget,
    Loader, MappedNormalizer, MediaEnricher, Normalizer, PageFetcher, RetryPolicy, Transport,
};
use crate::storage::IndexStore;
use crate::utils::http::{create_async_client, create_media_client};

type ProtocolFactory = fn(&SourceDefinition) -> Result<Arc<dyn CursorProtocol>>;
type CleanupFactory = fn() -> Arc<dyn CleanupAction>;

/// Items between two progress lines of the `progress` cleanup action.
const PROGRESS_EVERY: usize = 100;

fn oai_pmh(source: &SourceDefinition) -> Result<Arc<dyn CursorProtocol>> {
    Ok(Arc::new(OaiPmh::from_source(source)?))
}

fn json_offset(source: &SourceDefinition) -> Result<Arc<dyn CursorProtocol>> {
    Ok(Arc::new(JsonOffset::from_source(source)?))
}

fn json_cursor(source: &SourceDefinition) -> Result<Arc<dyn CursorProtocol>> {
    Ok(Arc::new(JsonCursor::from_source(source)?))
}

fn json_lines(source: &SourceDefinition) -> Result<Arc<dyn CursorProtocol>> {
    Ok(Arc::new(JsonLines::from_source(source)?))
}

fn log_cleanup() -> Arc<dyn CleanupAction> {
    Arc::new(LogCleanup)
}

fn progress_cleanup() -> Arc<dyn CleanupAction> {
    Arc::new(ProgressCleanup::new(PROGRESS_EVERY))
}

/// Components resolved for one source.
pub struct Components {
    pub extractor: Extractor,
    pub normalizer: Arc<dyn Normalizer>,
    pub enrichers: Vec<Arc<dyn EnrichmentStage>>,
    pub loader: Arc<dyn Loader>,
    pub cleanup: Option<Arc<dyn CleanupAction>>,
}

impl Components {
    /// The chain plan every record of this harvest runs with.
    pub fn plan(
        &self,
        source: &SourceDefinition,
        target: LoadTarget,
        resolver_base_url: &str,
    ) -> ChainPlan {
        ChainPlan {
            source: source.clone(),
            normalizer: Arc::clone(&self.normalizer),
            enrichers: self.enrichers.clone(),
            loader: Arc::clone(&self.loader),
            cleanup: self.cleanup.clone(),
            target,
            resolver_base_url: resolver_base_url.to_string(),
        }
    }
}

pub struct Registry {
    protocols: BTreeMap<&'static str, ProtocolFactory>,
    fetchers: HashMap<Transport, Arc<dyn PageFetcher>>,
    normalizers: BTreeMap<&'static str, Arc<dyn Normalizer>>,
    enrichers: BTreeMap<String, Arc<dyn EnrichmentStage>>,
    loaders: BTreeMap<&'static str, Arc<dyn Loader>>,
    cleanups: BTreeMap<&'static str, CleanupFactory>,
    policy: RetryPolicy,
    request_delay: Duration,
}

impl Registry {
    /// Registry with every built-in component, writing to `store`.
    pub fn new(config: &Config, store: Arc<dyn IndexStore>) -> Result<Self> {
        let http: Arc<dyn PageFetcher> =
            Arc::new(HttpFetcher::new(create_async_client(&config.extractor)?));
        let media = MediaEnricher::new(
            create_media_client(config)?,
            &config.enrichment,
            vec![Arc::new(MediaTypeTask), Arc::new(ImageDimensionsTask)],
        );

        let mut protocols: BTreeMap<&'static str, ProtocolFactory> = BTreeMap::new();
        protocols.insert("oai_pmh", oai_pmh);
        protocols.insert("json_offset", json_offset);
        protocols.insert("json_cursor", json_cursor);
        protocols.insert("json_lines", json_lines);

        let mut fetchers = HashMap::new();
        fetchers.insert(Transport::Http, http);
        fetchers.insert(Transport::File, Arc::new(FileFetcher) as Arc<dyn PageFetcher>);

        let mut normalizers: BTreeMap<&'static str, Arc<dyn Normalizer>> = BTreeMap::new();
        normalizers.insert("mapped", Arc::new(MappedNormalizer));

        let mut enrichers: BTreeMap<String, Arc<dyn EnrichmentStage>> = BTreeMap::new();
        enrichers.insert(MediaEnricher::NAME.to_string(), Arc::new(media));

        let mut loaders: BTreeMap<&'static str, Arc<dyn Loader>> = BTreeMap::new();
        loaders.insert("index", Arc::new(IndexLoader::new(store)));

        let mut cleanups: BTreeMap<&'static str, CleanupFactory> = BTreeMap::new();
        cleanups.insert("log", log_cleanup);
        cleanups.insert("progress", progress_cleanup);

        Ok(Self {
            protocols,
            fetchers,
            normalizers,
            enrichers,
            loaders,
            cleanups,
            policy: RetryPolicy::from_config(&config.extractor),
            request_delay: Duration::from_millis(config.extractor.request_delay_ms),
        })
    }

    /// Replace the fetcher used for a transport.
    pub fn with_fetcher(mut self, transport: Transport, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetchers.insert(transport, fetcher);
        self
    }

    /// Register an additional enrichment stage under its own name.
    pub fn with_enricher(mut self, stage: Arc<dyn EnrichmentStage>) -> Self {
        self.enrichers.insert(stage.name().to_string(), stage);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registered names per component kind.
    pub fn names(&self) -> Vec<(&'static str, Vec<String>)> {
        vec![
            ("extractor", self.protocols.keys().map(|k| k.to_string()).collect()),
            ("normalizer", self.normalizers.keys().map(|k| k.to_string()).collect()),
            ("enricher", self.enrichers.keys().cloned().collect()),
            ("loader", self.loaders.keys().map(|k| k.to_string()).collect()),
            ("cleanup", self.cleanups.keys().map(|k| k.to_string()).collect()),
        ]
    }

    /// Resolve every component a source names.
    pub fn resolve(&self, source: &SourceDefinition) -> Result<Components> {
        let factory = self
            .protocols
            .get(source.extractor.as_str())
            .ok_or_else(|| AppError::registry("extractor", source.extractor.as_str()))?;
        let protocol = factory(source)?;
        let fetcher = self
            .fetchers
            .get(&protocol.transport())
            .cloned()
            .ok_or_else(|| {
                AppError::config(format!("no fetcher for {:?}", protocol.transport()))
            })?;
        let extractor =
            Extractor::new(protocol, fetcher, self.policy).with_request_delay(self.request_delay);

        let normalizer = self
            .normalizers
            .get(source.normalizer.as_str())
            .cloned()
            .ok_or_else(|| AppError::registry("normalizer", source.normalizer.as_str()))?;

        let enrichers = source
            .enrichers
            .iter()
            .map(|name| {
                self.enrichers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| AppError::registry("enricher", name.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;

        let loader = self
            .loaders
            .get(source.loader.as_str())
            .cloned()
            .ok_or_else(|| AppError::registry("loader", source.loader.as_str()))?;

        let cleanup = match &source.cleanup {
            Some(name) => Some(
                self.cleanups
                    .get(name.as_str())
                    .map(|factory| factory())
                    .ok_or_else(|| AppError::registry("cleanup", name.as_str()))?,
            ),
            None => None,
        };

        Ok(Components {
            extractor,
            normalizer,
            enrichers,
            loader,
            cleanup,
        })
    }
}
