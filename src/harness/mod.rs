// ============================================================================
// Scenario Harness
// ============================================================================
//
// Reset the counter, start every configured worker at the same instant on the
// multi-threaded runtime, join them and re-read the counter. Conflicts show up
// in the worker reports; only a failing reset or final read is an error.
//
// ============================================================================

pub mod config;

pub use config::{HarnessConfig, StoreConfig, WorkerSpec};

use crate::core::{Counter, CounterRow, DbError, Result};
use crate::facade::Store;
use crate::worker::{
    Discipline, OptimisticWorker, PessimisticWorker, RunRecorder, Worker, WorkerReport,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Barrier;
use tokio::task::JoinError;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub discipline: Discipline,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u128,
    pub initial: Counter,
    pub workers: Vec<WorkerReport>,
    pub final_counter: CounterRow,
}

impl ScenarioReport {
    pub fn decrements(&self) -> usize {
        self.workers.iter().filter(|w| w.decremented()).count()
    }

    pub fn conflicts(&self) -> usize {
        self.workers.iter().filter(|w| w.is_conflict()).count()
    }

    pub fn committed(&self) -> usize {
        self.workers.iter().filter(|w| w.is_committed()).count()
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.name == name)
    }
}

pub struct Harness {
    store: Store,
}

impl Harness {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(&self, config: &HarnessConfig) -> Result<ScenarioReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("scenario", %run_id, discipline = %config.discipline);
        self.run_scenario(run_id, config).instrument(span).await
    }

    async fn run_scenario(&self, run_id: Uuid, config: &HarnessConfig) -> Result<ScenarioReport> {
        let initial = config.initial_counter();
        self.store.reset(initial).await?;
        info!(counter = %initial.id, value = initial.row.value, "counter reset");

        let started_at = Utc::now();
        let clock = Instant::now();
        let worker = self.build_worker(config);
        let start = Arc::new(Barrier::new(config.workers.len()));

        let handles: Vec<_> = config
            .workers
            .iter()
            .cloned()
            .map(|planned| {
                let worker = Arc::clone(&worker);
                let start = Arc::clone(&start);
                let name = planned.name.clone();
                let handle = tokio::spawn(async move {
                    start.wait().await;
                    worker.run(&planned.name, planned.delay).await
                });
                (name, handle)
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut workers = Vec::with_capacity(names.len());
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            workers.push(worker_report(&name, config.discipline, joined));
        }

        let final_counter = self.store.read(config.counter_id).await?;
        info!(value = final_counter.value, version = ?final_counter.version, "final value {}", final_counter.value);

        Ok(ScenarioReport {
            run_id,
            discipline: config.discipline,
            started_at,
            elapsed_ms: clock.elapsed().as_millis(),
            initial,
            workers,
            final_counter,
        })
    }

    fn build_worker(&self, config: &HarnessConfig) -> Arc<dyn Worker> {
        match config.discipline {
            Discipline::Pessimistic => {
                Arc::new(PessimisticWorker::new(self.store.clone(), config.counter_id))
            }
            Discipline::Optimistic => {
                let worker = OptimisticWorker::new(self.store.clone(), config.counter_id);
                if config.read_rendezvous {
                    let barrier = Arc::new(Barrier::new(config.workers.len()));
                    Arc::new(worker.with_read_barrier(barrier))
                } else {
                    Arc::new(worker)
                }
            }
        }
    }
}

/// Unwrap a joined worker task. A panic inside a worker is a bug and is
/// re-raised here; a cancelled task is reported as aborted.
fn worker_report(
    name: &str,
    discipline: Discipline,
    joined: std::result::Result<WorkerReport, JoinError>,
) -> WorkerReport {
    match joined {
        Ok(report) => report,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => RunRecorder::new(name, discipline)
            .aborted(&DbError::Cancelled(format!("worker task {}: {}", name, err))),
    }
}
