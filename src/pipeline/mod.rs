//! Pipeline entry points for harvester operations.
//!
//! - `run_pipeline`: Harvest one source into the index
//! - `cutover`: Repoint an alias to a new index generation

pub mod chain;
pub mod cleanup;
pub mod cutover;
pub mod orchestrator;
pub mod runtime;

pub use chain::{ChainOutcome, ChainPlan, ChainState, Stage, TaskChain};
pub use cleanup::{CleanupAction, CleanupContext, Outcome};
pub use cutover::{CutoverController, CutoverReport, CutoverState, IndexGeneration, cutover};
pub use orchestrator::{
    Generation, HarvestOptions, HarvestReport, retained_generation_notice, run_pipeline,
    run_pipeline_on,
};
pub use runtime::{LocalRuntime, RuntimeReport, TaskRuntime};
