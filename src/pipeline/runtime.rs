// src/pipeline/runtime.rs

//! Task runtimes that execute submitted chains.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::RuntimeConfig;
use crate::pipeline::chain::{ChainOutcome, TaskChain};

/// Callback invoked with the outcome of every finished chain.
pub type ChainCallback = Arc<dyn Fn(&ChainOutcome) + Send + Sync>;

/// Counters over every chain a runtime finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeReport {
    pub completed: usize,
    pub failed: usize,
    pub resolver_created: usize,
    pub resolver_existing: usize,
}

impl RuntimeReport {
    fn record(&mut self, outcome: &ChainOutcome) {
        if outcome.succeeded() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        if let Some(load) = &outcome.load {
            self.resolver_created += load.resolver_created;
            self.resolver_existing += load.resolver_existing;
        }
    }
}

/// Count a finished chain. A poisoned report is logged and still counted.
fn record_outcome(report: &Mutex<RuntimeReport>, outcome: &ChainOutcome) {
    match report.lock() {
        Ok(mut report) => report.record(outcome),
        Err(poisoned) => {
            log::error!(
                "runtime report lock poisoned while recording {:?}",
                outcome.object_id
            );
            poisoned.into_inner().record(outcome);
        }
    }
}

/// Executes task chains. Chains are independent and may finish in any order.
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Queue a chain. Waits while the queue is full.
    async fn submit(&self, chain: TaskChain) -> Result<()>;

    /// Stop accepting chains, wait for queued ones, and report.
    async fn shutdown(&mut self) -> Result<RuntimeReport>;
}

/// In-process runtime: a pool of tokio workers sharing a bounded queue.
pub struct LocalRuntime {
    sender: Option<mpsc::Sender<TaskChain>>,
    workers: Vec<JoinHandle<()>>,
    report: Arc<Mutex<RuntimeReport>>,
}

impl LocalRuntime {
    pub fn start(config: &RuntimeConfig) -> Self {
        Self::with_callbacks(config, Vec::new())
    }

    /// Start workers that call every callback after each chain.
    pub fn with_callbacks(config: &RuntimeConfig, callbacks: Vec<ChainCallback>) -> Self {
        let (sender, receiver) = mpsc::channel::<TaskChain>(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let report = Arc::new(Mutex::new(RuntimeReport::default()));
        let callbacks = Arc::new(callbacks);

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let report = Arc::clone(&report);
                let callbacks = Arc::clone(&callbacks);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(chain) = next else {
                            log::debug!("worker {worker} stopping");
                            break;
                        };
                        let outcome = chain.run().await;
                        record_outcome(&report, &outcome);
                        for callback in callbacks.iter() {
                            callback(&outcome);
                        }
                    }
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            report,
        }
    }
}

#[async_trait]
impl TaskRuntime for LocalRuntime {
    async fn submit(&self, chain: TaskChain) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| AppError::validation("runtime already shut down"))?;
        sender
            .send(chain)
            .await
            .map_err(|_| AppError::validation("runtime workers are gone"))
    }

    async fn shutdown(&mut self) -> Result<RuntimeReport> {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                log::error!("worker panicked: {e}");
            }
        }
        self.report
            .lock()
            .map(|report| *report)
            .map_err(|_| AppError::validation("runtime report lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::RawRecord;
    use crate::pipeline::chain::{ChainPlan, ChainState};
    use crate::pipeline::chain::tests::museum_source;
    use crate::services::loader::{IndexLoader, LoadTarget};
    use crate::services::normalizer::MappedNormalizer;
    use crate::storage::MemoryStore;

    fn plan(store: Arc<MemoryStore>) -> Arc<ChainPlan> {
        Arc::new(ChainPlan {
            source: museum_source(),
            normalizer: Arc::new(MappedNormalizer),
            enrichers: Vec::new(),
            loader: Arc::new(IndexLoader::new(store)),
            cleanup: None,
            target: LoadTarget {
                combined_index: "combined_index".into(),
                source_index: "museum_x".into(),
                resolver_index: "resolver".into(),
            },
            resolver_base_url: "http://resolver.example/media".into(),
        })
    }

    #[tokio::test]
    async fn test_runs_all_chains_and_reports() {
        let store = Arc::new(MemoryStore::new());
        let plan = plan(store.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut runtime = LocalRuntime::with_callbacks(
            &RuntimeConfig {
                workers: 3,
                queue_capacity: 2,
            },
            vec![Arc::new(move |_: &ChainOutcome| {
                counter.fetch_add(1, Ordering::SeqCst);
            })],
        );

        for i in 0..10 {
            let record = RawRecord::json(format!(r#"{{"id": "obj-{i}"}}"#).into_bytes());
            runtime
                .submit(TaskChain::new(Arc::clone(&plan), record))
                .await
                .unwrap();
        }
        runtime
            .submit(TaskChain::new(
                Arc::clone(&plan),
                RawRecord::json(br#"{"title": "no identity"}"#.to_vec()),
            ))
            .await
            .unwrap();

        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.completed, 10);
        assert_eq!(report.failed, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 11);
        assert_eq!(store.count("museum_x"), 10);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let store = Arc::new(MemoryStore::new());
        let mut runtime = LocalRuntime::start(&RuntimeConfig::default());
        runtime.shutdown().await.unwrap();

        let chain = TaskChain::new(plan(store), RawRecord::json(b"{}".to_vec()));
        assert!(runtime.submit(chain).await.is_err());
    }

    #[test]
    fn test_poisoned_report_still_counts() {
        let report = Arc::new(Mutex::new(RuntimeReport::default()));
        let held = Arc::clone(&report);
        let _ = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            panic!("worker died holding the report");
        })
        .join();
        assert!(report.is_poisoned());

        let outcome = ChainOutcome {
            state: ChainState::Failed,
            object_id: None,
            failed_at: None,
            error: None,
            enrichment: Vec::new(),
            load: None,
        };
        record_outcome(&report, &outcome);

        let counts = *report.lock().unwrap_or_else(|p| p.into_inner());
        assert_eq!(counts.failed, 1);
    }
}
