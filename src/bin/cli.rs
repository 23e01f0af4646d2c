//! Harvester CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    config,
    context::AppContext,
    error::{AppError, Result},
    pipeline::{self, Generation, HarvestOptions},
    storage::MemoryStore,
};

/// Harvester - cultural-heritage metadata harvester
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvest, normalize and index cultural-heritage metadata"
)]
struct Cli {
    /// Directory containing config.toml and sources.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest one source into the index
    Harvest {
        /// Source id from sources.toml
        source: String,

        /// Write into a new index generation and cut the alias over
        #[arg(long)]
        fresh: bool,

        /// Load into an in-memory store instead of the configured index
        #[arg(long)]
        dry_run: bool,
    },

    /// Repoint an alias to a new index and delete the old one
    Cutover {
        #[arg(long)]
        old: String,

        #[arg(long)]
        new: String,

        #[arg(long)]
        alias: String,
    },

    /// List configured sources
    Sources,

    /// Validate configuration, sources and component names
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
    harvester::utils::log::init(level);
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, catalog) = config::load_all(&cli.config_dir)?;
    log::info!("Loaded configuration from {}", cli.config_dir.display());

    match cli.command {
        Command::Harvest {
            source,
            fresh,
            dry_run,
        } => {
            let definition = catalog
                .get(&source)
                .ok_or_else(|| AppError::config(format!("Unknown source: {source}")))?;

            let ctx = if dry_run {
                log::info!("Dry run: documents go to an in-memory store");
                AppContext::with_store(config, Arc::new(MemoryStore::new()))?
            } else {
                AppContext::new(config)?
            };
            let options = HarvestOptions {
                generation: if fresh {
                    Generation::Fresh
                } else {
                    Generation::Current
                },
            };

            let report = pipeline::run_pipeline(&ctx, definition, options).await?;
            log::info!(
                "{} loaded, {} failed into {}",
                report.chains.completed,
                report.chains.failed,
                report.source_index
            );
        }

        Command::Cutover { old, new, alias } => {
            let ctx = AppContext::new(config)?;
            let report = pipeline::cutover(Arc::clone(&ctx.store), &old, &new, &alias).await?;
            if report.old_deleted() {
                log::info!("{} now points to {}; {} deleted", alias, new, old);
            } else {
                log::warn!("{} now points to {}; {} could not be deleted", alias, new, old);
            }
        }

        Command::Sources => {
            for source in &catalog.sources {
                let enrichers = if source.enrichers.is_empty() {
                    "-".to_string()
                } else {
                    source.enrichers.join(",")
                };
                println!(
                    "{:<20} {:<12} {:<24} enrichers: {}",
                    source.id, source.extractor, source.index_name, enrichers
                );
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!("✓ Config OK");
            log::info!("✓ {} sources", catalog.sources.len());

            let ctx = AppContext::with_store(config, Arc::new(MemoryStore::new()))?;
            let mut failed = 0;
            for source in &catalog.sources {
                if let Err(e) = ctx.registry.resolve(source) {
                    log::error!("Source {} does not resolve: {}", source.id, e);
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(AppError::validation(format!(
                    "{failed} sources failed to resolve"
                )));
            }
            log::info!("All validations passed!");
        }
    }

    Ok(())
}
