// ============================================================================
// RustLockDB Library
// ============================================================================
//
// A transactional counter store and two workers that contend on it:
// - PessimisticWorker: exclusive write intent from BEGIN to COMMIT
// - OptimisticWorker: lock-free read, version-checked conditional write
//
// ============================================================================

pub mod core;
pub mod facade;
pub mod harness;
pub mod storage;
pub mod transaction;
pub mod worker;

// Re-export main types for convenience
pub use crate::core::{Counter, CounterId, CounterRow, DbError, ErrorKind, Result};
pub use facade::{CommitInfo, Store, StoreStats, StoreTransaction};
pub use harness::{Harness, HarnessConfig, ScenarioReport, StoreConfig, WorkerSpec};
pub use storage::{DurabilityMode, FaultPoint};
pub use transaction::{TransactionId, TransactionMode, TransactionState};
pub use worker::{
    Discipline, OptimisticWorker, PessimisticWorker, Phase, Worker, WorkerOutcome, WorkerReport,
};
