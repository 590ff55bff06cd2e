//! Optimistic locking: read `(value, version)` without locking, do the work,
//! then write only if the version is unchanged. Losing the race is a
//! `WriteConflict`, not a fault.

use super::{Discipline, Phase, RunRecorder, Worker, WorkerOutcome, WorkerReport};
use crate::core::{CounterId, DbError, Result};
use crate::facade::{Store, StoreTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tracing::{Instrument, info, info_span, warn};

pub struct OptimisticWorker {
    store: Store,
    counter: CounterId,
    // Every participant waits here right after its read, so all of them
    // capture the same version before anyone writes.
    read_barrier: Option<Arc<Barrier>>,
}

impl OptimisticWorker {
    pub fn new(store: Store, counter: CounterId) -> Self {
        Self {
            store,
            counter,
            read_barrier: None,
        }
    }

    pub fn with_read_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.read_barrier = Some(barrier);
        self
    }

    async fn execute(&self, name: &str, delay: Duration) -> WorkerReport {
        let mut recorder = RunRecorder::new(name, Discipline::Optimistic);
        let mut rendezvous = Rendezvous::new(self.read_barrier.as_ref());

        info!("{}: begin transaction..", name);
        let mut txn = match self.store.begin_deferred().await {
            Ok(txn) => txn,
            Err(err) => {
                rendezvous.arrive().await;
                return recorder.aborted(&err);
            }
        };
        recorder.opened(txn.id());

        let outcome = match self
            .work(&mut txn, name, delay, &mut recorder, &mut rendezvous)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                rendezvous.arrive().await;
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(worker = name, error = %rollback_err, "rollback failed");
                }
                return recorder.aborted(&err);
            }
        };

        match txn.commit().await {
            Ok(_) => {
                if matches!(outcome, WorkerOutcome::Decremented { .. }) {
                    info!("{}: Success", name);
                }
                recorder.committed(outcome, None)
            }
            Err(err) => recorder.aborted(&err),
        }
    }

    async fn work(
        &self,
        txn: &mut StoreTransaction,
        name: &str,
        delay: Duration,
        recorder: &mut RunRecorder,
        rendezvous: &mut Rendezvous<'_>,
    ) -> Result<WorkerOutcome> {
        let row = txn.read(self.counter).await?;
        recorder.observe(row);
        let version = row.version.ok_or(DbError::Unversioned(self.counter))?;
        info!("{}: initial {} with version {}", name, row.value, version);

        rendezvous.arrive().await;
        recorder.advance(Phase::Working);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if row.value <= 0 {
            info!("{}: No value", name);
            return Ok(WorkerOutcome::NoOp { value: row.value });
        }

        info!("{}: Trying update with version {}", name, version);
        let updated = txn.write_decrement(self.counter, Some(version)).await?;
        info!("{}: update executed", name);
        if updated == 0 {
            return Err(DbError::WriteConflict(format!(
                "version mismatch, expected version {}",
                version
            )));
        }
        Ok(WorkerOutcome::Decremented {
            from: row.value,
            to: row.value - 1,
            version: Some(version + 1),
        })
    }
}

#[async_trait]
impl Worker for OptimisticWorker {
    fn discipline(&self) -> Discipline {
        Discipline::Optimistic
    }

    async fn run(&self, name: &str, delay: Duration) -> WorkerReport {
        let span = info_span!("worker", worker = %name, discipline = "optimistic", counter = %self.counter);
        self.execute(name, delay).instrument(span).await
    }
}

/// Waits on the read barrier at most once per run, including on error paths,
/// so a failed worker never strands its peers.
struct Rendezvous<'a> {
    barrier: Option<&'a Arc<Barrier>>,
}

impl<'a> Rendezvous<'a> {
    fn new(barrier: Option<&'a Arc<Barrier>>) -> Self {
        Self { barrier }
    }

    async fn arrive(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.wait().await;
        }
    }
}
