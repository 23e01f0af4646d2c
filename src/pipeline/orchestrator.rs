// src/pipeline/orchestrator.rs

//! Harvest orchestration: extract, submit one chain per record, drain,
//! and optionally cut the source alias over to a fresh index.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::AppContext;
use crate::error::Result;
use crate::models::SourceDefinition;
use crate::pipeline::chain::TaskChain;
use crate::pipeline::cutover::{CutoverController, CutoverReport, IndexGeneration};
use crate::pipeline::runtime::{LocalRuntime, RuntimeReport, TaskRuntime};
use crate::services::{HarvestStats, LoadTarget};
use crate::utils::log;

/// Which index generation a harvest writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Generation {
    /// Write into `index_name` (or whatever it aliases).
    #[default]
    Current,
    /// Write into a new timestamped index and cut `index_name` over to it.
    Fresh,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestOptions {
    pub generation: Generation,
}

/// Outcome of one harvest.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Index the per-source documents were written to
    pub source_index: String,
    pub extraction: HarvestStats,
    pub chains: RuntimeReport,
    pub cutover: Option<CutoverReport>,
}

/// Name of a fresh generation of `index_name`.
pub fn generation_name(index_name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", index_name, at.format("%Y%m%d%H%M%S"))
}

/// Action item for a fresh generation left behind by a failed run.
pub fn retained_generation_notice(index: &str, alias: &str) -> String {
    format!("Fresh index {index} retained, alias {alias} unchanged; delete it once inspected")
}

/// Run one full harvest of `source` on the in-process runtime.
pub async fn run_pipeline(
    ctx: &AppContext,
    source: &SourceDefinition,
    options: HarvestOptions,
) -> Result<HarvestReport> {
    let runtime = LocalRuntime::start(&ctx.config.runtime);
    run_pipeline_on(ctx, source, options, runtime).await
}

/// Run one full harvest of `source`, executing chains on `runtime`.
///
/// Record-scoped failures are logged and counted. A harvest-scoped error is
/// returned after every submitted chain has finished; a fresh generation is
/// then left in place without cutover.
pub async fn run_pipeline_on<R: TaskRuntime>(
    ctx: &AppContext,
    source: &SourceDefinition,
    options: HarvestOptions,
    mut runtime: R,
) -> Result<HarvestReport> {
    let started_at = Utc::now();
    log::header(&format!("Harvesting {} ({})", source.id, source.extractor));

    let components = ctx.registry.resolve(source)?;

    let (source_index, old_generations) = match options.generation {
        Generation::Current => (source.index_name.clone(), Vec::new()),
        Generation::Fresh => {
            let old = ctx.store.alias_targets(&source.index_name).await?;
            let fresh = generation_name(&source.index_name, started_at);
            ctx.store.create_index(&fresh).await?;
            log::sub_item(&format!("Writing into fresh index {fresh}"));
            (fresh, old)
        }
    };

    let target = LoadTarget {
        combined_index: ctx.config.index.combined_index.clone(),
        source_index: source_index.clone(),
        resolver_index: ctx.config.index.resolver_index.clone(),
    };
    let plan = Arc::new(components.plan(source, target, &ctx.config.index.resolver_base_url));

    let total_steps = if options.generation == Generation::Fresh { 3 } else { 2 };
    log::step(1, total_steps, "Extract - submitting records");

    let mut harvest = components.extractor.run(source);
    let mut harvest_error = None;
    loop {
        match harvest.next_record().await {
            Ok(Some(record)) => {
                if let Err(e) = runtime.submit(TaskChain::new(Arc::clone(&plan), record)).await {
                    harvest_error = Some(e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                harvest_error = Some(e);
                break;
            }
        }
    }
    let extraction = harvest.stats().clone();
    log::info(&format!(
        "{} records submitted from {} pages",
        extraction.records, extraction.pages
    ));

    log::step(2, total_steps, "Process - waiting for task chains");
    let chains = runtime.shutdown().await?;

    let mut cutover = None;
    if options.generation == Generation::Fresh {
        log::step(3, total_steps, "Cutover");
        if let Some(e) = &harvest_error {
            log::warn(&format!("Harvest failed: {e}"));
            log::warn(&retained_generation_notice(&source_index, &source.index_name));
        } else {
            let generation = IndexGeneration {
                alias: source.index_name.clone(),
                old_indices: old_generations,
                new_index: source_index.clone(),
            };
            match CutoverController::new(Arc::clone(&ctx.store), generation)
                .cutover()
                .await
            {
                Ok(report) => cutover = Some(report),
                Err(e) => {
                    log::warn(&retained_generation_notice(&source_index, &source.index_name));
                    return Err(e);
                }
            }
        }
    }

    let report = HarvestReport {
        source_id: source.id.clone(),
        started_at,
        finished_at: Utc::now(),
        source_index,
        extraction,
        chains,
        cutover,
    };
    log_summary(&report);

    match harvest_error {
        Some(e) => Err(e),
        None => {
            log::success(&format!("Harvest of {} complete", source.id));
            Ok(report)
        }
    }
}

fn log_summary(report: &HarvestReport) {
    let elapsed = report.finished_at - report.started_at;
    let mut items = vec![
        ("Index", report.source_index.clone()),
        ("Pages", report.extraction.pages.to_string()),
        ("Skipped pages", report.extraction.skipped_pages.to_string()),
        ("Records", report.extraction.records.to_string()),
        ("Unfetchable records", report.extraction.failed_records.to_string()),
        ("Loaded", report.chains.completed.to_string()),
        ("Failed", report.chains.failed.to_string()),
        ("New media", report.chains.resolver_created.to_string()),
        ("Duration", format!("{}s", elapsed.num_seconds())),
    ];
    if let Some(total) = report.extraction.total_hint {
        items.push(("Reported total", total.to_string()));
    }
    if let Some(cutover) = &report.cutover {
        items.push(("Alias", format!("{} -> {}", cutover.alias, cutover.new_index)));
    }
    log::summary(&format!("Harvest {}", report.source_id), &items);
}
