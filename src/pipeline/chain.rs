// src/pipeline/chain.rs

//! Per-record task chains.
//!
//! A chain is an ordered list of stage descriptors, always
//! `Normalize, Enrich(0), .., Enrich(n-1), Load`, executed as a small state
//! machine:
//!
//! ```text
//! Normalizing -> Enriching(0) -> ... -> Enriching(n-1) -> Loading -> Done
//!      |                                                     |
//!      +-------------------------> Failed <------------------+
//! ```
//!
//! Enrichment never moves a chain to `Failed`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{NormalizedItem, RawRecord, SourceDefinition};
use crate::pipeline::cleanup::{CleanupAction, CleanupContext, Outcome};
use crate::services::enrichment::{EnrichmentStage, StageOutcome, run_stage};
use crate::services::loader::{LoadReport, LoadTarget, Loader};
use crate::services::normalizer::Normalizer;

/// One step of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalize,
    /// Index into the plan's enrichers
    Enrich(usize),
    Load,
}

/// Position of a chain in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Normalizing,
    Enriching(usize),
    Loading,
    Done,
    Failed,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Done | ChainState::Failed)
    }
}

impl From<Stage> for ChainState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Normalize => ChainState::Normalizing,
            Stage::Enrich(i) => ChainState::Enriching(i),
            Stage::Load => ChainState::Loading,
        }
    }
}

/// Components a source's chains run with, resolved once per harvest.
pub struct ChainPlan {
    pub source: SourceDefinition,
    pub normalizer: Arc<dyn Normalizer>,
    pub enrichers: Vec<Arc<dyn EnrichmentStage>>,
    pub loader: Arc<dyn Loader>,
    pub cleanup: Option<Arc<dyn CleanupAction>>,
    pub target: LoadTarget,
    pub resolver_base_url: String,
}

/// Result of running one chain.
#[derive(Debug)]
pub struct ChainOutcome {
    pub state: ChainState,
    pub object_id: Option<String>,
    /// Stage the chain failed in
    pub failed_at: Option<Stage>,
    pub error: Option<AppError>,
    pub enrichment: Vec<StageOutcome>,
    pub load: Option<LoadReport>,
}

impl ChainOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == ChainState::Done
    }
}

/// The unit of work submitted to a task runtime.
pub struct TaskChain {
    plan: Arc<ChainPlan>,
    record: RawRecord,
    stages: Vec<Stage>,
}

impl TaskChain {
    pub fn new(plan: Arc<ChainPlan>, record: RawRecord) -> Self {
        let mut stages = vec![Stage::Normalize];
        stages.extend((0..plan.enrichers.len()).map(Stage::Enrich));
        stages.push(Stage::Load);
        Self {
            plan,
            record,
            stages,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn state_after(&self, position: usize) -> ChainState {
        self.stages
            .get(position + 1)
            .map(|stage| ChainState::from(*stage))
            .unwrap_or(ChainState::Done)
    }

    fn normalize(&self) -> Result<NormalizedItem> {
        let mut item = self
            .plan
            .normalizer
            .normalize(&self.plan.source, &self.record)?;
        item.resolve_media_urls(&self.plan.resolver_base_url)?;
        Ok(item)
    }

    async fn load(&self, item: &mut NormalizedItem) -> Result<LoadReport> {
        item.meta.set("processing_finished", Utc::now())?;
        let combined = item.combined_document();
        let source = item.source_document();
        self.plan
            .loader
            .load(&self.plan.target, &item.object_id, &combined, &source)
            .await
    }

    /// Drive the chain to `Done` or `Failed`, then run the cleanup hook.
    pub async fn run(self) -> ChainOutcome {
        let mut outcome = ChainOutcome {
            state: ChainState::Normalizing,
            object_id: None,
            failed_at: None,
            error: None,
            enrichment: Vec::new(),
            load: None,
        };
        let mut item: Option<NormalizedItem> = None;
        let mut position = 0;
        let mut state = self
            .stages
            .first()
            .map(|stage| ChainState::from(*stage))
            .unwrap_or(ChainState::Done);

        while !state.is_terminal() {
            let Some(stage) = self.stages.get(position).copied() else {
                break;
            };
            let result = match state {
                ChainState::Normalizing => match self.normalize() {
                    Ok(normalized) => {
                        outcome.object_id = Some(normalized.object_id.clone());
                        item = Some(normalized);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                ChainState::Enriching(i) => match item.as_mut() {
                    Some(current) => {
                        if let Some(enricher) = self.plan.enrichers.get(i) {
                            outcome
                                .enrichment
                                .push(run_stage(enricher.as_ref(), current).await);
                        }
                        Ok(())
                    }
                    None => Err(AppError::validation("enrichment reached without an item")),
                },
                ChainState::Loading => match item.as_mut() {
                    Some(current) => match self.load(current).await {
                        Ok(report) => {
                            outcome.load = Some(report);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    },
                    None => Err(AppError::validation("loading reached without an item")),
                },
                ChainState::Done | ChainState::Failed => Ok(()),
            };

            state = match result {
                Ok(()) => {
                    let next = self.state_after(position);
                    position += 1;
                    next
                }
                Err(e) => {
                    log::warn!(
                        "[{}] {:?} failed for {}: {}",
                        self.plan.source.id,
                        stage,
                        outcome.object_id.as_deref().unwrap_or("unidentified record"),
                        e
                    );
                    outcome.failed_at = Some(stage);
                    outcome.error = Some(e);
                    ChainState::Failed
                }
            };
        }
        outcome.state = state;

        if let Some(cleanup) = &self.plan.cleanup {
            let context = CleanupContext {
                source_id: self.plan.source.id.clone(),
                object_id: outcome.object_id.clone(),
                combined_index: self.plan.target.combined_index.clone(),
                source_index: self.plan.target.source_index.clone(),
                error: outcome.error.as_ref().map(ToString::to_string),
            };
            let result = if outcome.succeeded() {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            cleanup.run(result, &context);
        }

        outcome
    }
}
