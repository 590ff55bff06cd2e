//! Pessimistic locking: take the write intent at BEGIN and keep it until
//! commit, so the whole read-modify-write runs with other writers excluded.

use super::{Discipline, Phase, RunRecorder, Worker, WorkerOutcome, WorkerReport};
use crate::core::{CounterId, CounterRow, Result};
use crate::facade::{Store, StoreTransaction};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{Instrument, info, info_span, warn};

pub struct PessimisticWorker {
    store: Store,
    counter: CounterId,
}

impl PessimisticWorker {
    pub fn new(store: Store, counter: CounterId) -> Self {
        Self { store, counter }
    }

    async fn execute(&self, name: &str, delay: Duration) -> WorkerReport {
        let mut recorder = RunRecorder::new(name, Discipline::Pessimistic);

        info!("{}: begin transaction..", name);
        let mut txn = match self.store.begin_exclusive().await {
            Ok(txn) => txn,
            Err(err) => return recorder.aborted(&err),
        };
        recorder.opened(txn.id());

        let outcome = match self.work(&mut txn, name, delay, &mut recorder).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(worker = name, error = %rollback_err, "rollback failed");
                }
                return recorder.aborted(&err);
            }
        };

        if let Err(err) = txn.commit().await {
            return recorder.aborted(&err);
        }

        let final_value = match self.store.read(self.counter).await {
            Ok(row) => {
                info!("{}: current value {}", name, row.value);
                Some(row.value)
            }
            Err(err) => {
                warn!(worker = name, error = %err, "could not re-read counter after commit");
                None
            }
        };
        recorder.committed(outcome, final_value)
    }

    async fn work(
        &self,
        txn: &mut StoreTransaction,
        name: &str,
        delay: Duration,
        recorder: &mut RunRecorder,
    ) -> Result<WorkerOutcome> {
        recorder.advance(Phase::Working);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let row: CounterRow = txn.read(self.counter).await?;
        recorder.observe(row);
        info!("{}: current value {}", name, row.value);

        if row.value > 0 {
            info!("{}: decreasing value", name);
            txn.write_decrement(self.counter, None).await?;
            Ok(WorkerOutcome::Decremented {
                from: row.value,
                to: row.value - 1,
                version: row.version.map(|v| v + 1),
            })
        } else {
            info!("{}: value is 0", name);
            Ok(WorkerOutcome::NoOp { value: row.value })
        }
    }
}

#[async_trait]
impl Worker for PessimisticWorker {
    fn discipline(&self) -> Discipline {
        Discipline::Pessimistic
    }

    async fn run(&self, name: &str, delay: Duration) -> WorkerReport {
        let span = info_span!("worker", worker = %name, discipline = "pessimistic", counter = %self.counter);
        self.execute(name, delay).instrument(span).await
    }
}
