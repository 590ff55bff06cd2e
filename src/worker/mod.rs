// ============================================================================
// Workers
// ============================================================================
//
// A worker runs one read-modify-commit sequence against a counter under one
// concurrency-control discipline and reports what happened. Workers never
// propagate errors: every failure closes the transaction and ends up in the
// report, so one worker cannot take down another.
//
// ============================================================================

pub mod optimistic;
pub mod pessimistic;

pub use optimistic::OptimisticWorker;
pub use pessimistic::PessimisticWorker;

use crate::core::{CounterRow, DbError, ErrorKind};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    Pessimistic,
    Optimistic,
}

impl std::fmt::Display for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Discipline::Pessimistic => write!(f, "pessimistic"),
            Discipline::Optimistic => write!(f, "optimistic"),
        }
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn discipline(&self) -> Discipline;

    /// Run the full sequence. `delay` is a fixed sleep inside the transaction
    /// that widens the contention window.
    async fn run(&self, name: &str, delay: Duration) -> WorkerReport;
}

/// Worker state machine
///
/// ```text
/// Idle ──> TransactionOpen ──> Working ──> Committed
///   │             │               │
///   └─────────────┴───────────────┴──────> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    TransactionOpen,
    Working,
    Committed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// Committed one decrement
    Decremented {
        from: i64,
        to: i64,
        version: Option<u64>,
    },
    /// Value was already at the floor; committed without writing
    NoOp { value: i64 },
    /// Transaction rolled back
    Aborted { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub name: String,
    pub discipline: Discipline,
    pub txn_id: Option<TransactionId>,
    /// Row as read inside the transaction
    pub observed: Option<CounterRow>,
    pub outcome: WorkerOutcome,
    /// Committed value re-read after the transaction ended
    pub final_value: Option<i64>,
    /// Phases visited, in order
    pub phases: Vec<Phase>,
}

impl WorkerReport {
    pub fn is_committed(&self) -> bool {
        !matches!(self.outcome, WorkerOutcome::Aborted { .. })
    }

    pub fn decremented(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Decremented { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            WorkerOutcome::Aborted { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.error_kind() == Some(ErrorKind::WriteConflict)
    }
}

/// Collects one run's observations and enforces the phase order.
pub(crate) struct RunRecorder {
    name: String,
    discipline: Discipline,
    txn_id: Option<TransactionId>,
    observed: Option<CounterRow>,
    phases: Vec<Phase>,
}

impl RunRecorder {
    pub(crate) fn new(name: &str, discipline: Discipline) -> Self {
        Self {
            name: name.to_string(),
            discipline,
            txn_id: None,
            observed: None,
            phases: vec![Phase::Idle],
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Idle)
    }

    /// Move to `next`; terminal phases are final.
    pub(crate) fn advance(&mut self, next: Phase) {
        if self.phase().is_terminal() {
            warn!(worker = %self.name, from = ?self.phase(), to = ?next, "ignoring transition out of terminal phase");
            return;
        }
        self.phases.push(next);
    }

    pub(crate) fn opened(&mut self, txn_id: TransactionId) {
        self.txn_id = Some(txn_id);
        self.advance(Phase::TransactionOpen);
    }

    pub(crate) fn observe(&mut self, row: CounterRow) {
        self.observed = Some(row);
    }

    pub(crate) fn committed(mut self, outcome: WorkerOutcome, final_value: Option<i64>) -> WorkerReport {
        self.advance(Phase::Committed);
        self.into_report(outcome, final_value)
    }

    /// Log the failure as `{name}: error {detail}` and build the report.
    pub(crate) fn aborted(mut self, err: &DbError) -> WorkerReport {
        match err.kind() {
            ErrorKind::InvariantViolation => {
                error!(worker = %self.name, kind = %err.kind(), "{}: error {}", self.name, err)
            }
            _ => warn!(worker = %self.name, kind = %err.kind(), "{}: error {}", self.name, err),
        }
        self.advance(Phase::Aborted);
        let outcome = WorkerOutcome::Aborted {
            kind: err.kind(),
            message: err.to_string(),
        };
        self.into_report(outcome, None)
    }

    fn into_report(self, outcome: WorkerOutcome, final_value: Option<i64>) -> WorkerReport {
        WorkerReport {
            name: self.name,
            discipline: self.discipline,
            txn_id: self.txn_id,
            observed: self.observed,
            outcome,
            final_value,
            phases: self.phases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_committed_path() {
        let mut recorder = RunRecorder::new("t1", Discipline::Pessimistic);
        recorder.opened(TransactionId::new());
        recorder.advance(Phase::Working);
        let report = recorder.committed(WorkerOutcome::NoOp { value: 0 }, Some(0));

        assert_eq!(
            report.phases,
            vec![Phase::Idle, Phase::TransactionOpen, Phase::Working, Phase::Committed]
        );
        assert!(report.is_committed());
        assert!(!report.decremented());
    }

    #[test]
    fn test_recorder_terminal_is_final() {
        let mut recorder = RunRecorder::new("t2", Discipline::Optimistic);
        recorder.advance(Phase::Aborted);
        recorder.advance(Phase::Working);
        assert_eq!(recorder.phase(), Phase::Aborted);
    }

    #[test]
    fn test_aborted_report_carries_kind() {
        let recorder = RunRecorder::new("t1", Discipline::Optimistic);
        let report = recorder.aborted(&DbError::WriteConflict("version mismatch".into()));

        assert!(report.is_conflict());
        assert_eq!(report.error_kind(), Some(ErrorKind::WriteConflict));
        assert_eq!(report.phases.last(), Some(&Phase::Aborted));
    }
}
