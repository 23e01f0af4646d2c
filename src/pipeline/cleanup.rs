// src/pipeline/cleanup.rs

//! Compensating actions run once per item after its chain finishes.

use std::sync::atomic::{AtomicUsize, Ordering};

/// How an item's chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Everything a cleanup action gets to know about the item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupContext {
    pub source_id: String,
    /// Unknown when the item failed before identity was computed
    pub object_id: Option<String>,
    pub combined_index: String,
    pub source_index: String,
    pub error: Option<String>,
}

/// A source-declared cleanup hook. Must be idempotent.
pub trait CleanupAction: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, outcome: Outcome, context: &CleanupContext);
}

/// Logs every outcome.
pub struct LogCleanup;

impl CleanupAction for LogCleanup {
    fn name(&self) -> &str {
        "log"
    }

    fn run(&self, outcome: Outcome, context: &CleanupContext) {
        let object_id = context.object_id.as_deref().unwrap_or("-");
        match outcome {
            Outcome::Success => log::info!(
                "[{}] loaded {} into {}",
                context.source_id,
                object_id,
                context.source_index
            ),
            Outcome::Failure => log::warn!(
                "[{}] {} failed: {}",
                context.source_id,
                object_id,
                context.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Counts finished items and logs progress every `every` items.
pub struct ProgressCleanup {
    every: usize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressCleanup {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// (succeeded, failed) so far.
    pub fn counts(&self) -> (usize, usize) {
        (
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

impl CleanupAction for ProgressCleanup {
    fn name(&self) -> &str {
        "progress"
    }

    fn run(&self, outcome: Outcome, context: &CleanupContext) {
        match outcome {
            Outcome::Success => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        let (succeeded, failed) = self.counts();
        if (succeeded + failed) % self.every == 0 {
            log::info!(
                "[{}] {} items done ({} failed)",
                context.source_id,
                succeeded + failed,
                failed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let progress = ProgressCleanup::new(2);
        let context = CleanupContext {
            source_id: "museum_x".into(),
            ..Default::default()
        };
        progress.run(Outcome::Success, &context);
        progress.run(Outcome::Failure, &context);
        progress.run(Outcome::Success, &context);
        assert_eq!(progress.counts(), (2, 1));
    }
}
