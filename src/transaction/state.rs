// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted.
//
// Two begin modes mirror the classic SQL ones:
// - Exclusive: the write intent is taken at BEGIN, other writers wait
// - Deferred: nothing is locked at BEGIN, the snapshot is fixed by the first
//   statement and the write intent is requested lazily on the first write
//
// ============================================================================

use super::Change;
use crate::core::{CounterId, CounterRow, DbError, Result};
use crate::storage::Snapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// How a transaction acquires the write intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Write intent acquired at BEGIN; blocks while another writer holds it
    Exclusive,
    /// No lock at BEGIN; write intent is tried (never awaited) on first write
    Deferred,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::Exclusive => write!(f, "EXCLUSIVE"),
            TransactionMode::Deferred => write!(f, "DEFERRED"),
        }
    }
}

/// Transaction state
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Transaction is active and can execute operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Bookkeeping for one transaction: state, snapshot and buffered writes.
///
/// Locks are not held here; the store's transaction handle owns the write
/// intent guard so that dropping the handle always releases it.
#[derive(Debug)]
pub struct Transaction {
    /// Unique transaction identifier
    id: TransactionId,

    mode: TransactionMode,

    /// Current state (Active, Committed, Aborted)
    state: TransactionState,

    /// Snapshot for read consistency, fixed by the first statement
    snapshot: Option<Snapshot>,

    /// Buffered writes, in execution order
    changes: Vec<Change>,
}

impl Transaction {
    pub fn new(id: TransactionId, mode: TransactionMode) -> Self {
        Self {
            id,
            mode,
            state: TransactionState::Active,
            snapshot: None,
            changes: Vec::new(),
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Get the current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Get the snapshot, if a statement has run yet
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Fix the snapshot; later calls keep the first one
    pub fn pin_snapshot(&mut self, snapshot: Snapshot) -> &Snapshot {
        self.snapshot.get_or_insert(snapshot)
    }

    /// Get all changes recorded in this transaction
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Get the number of changes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Latest buffered row for a counter, if this transaction wrote it
    pub fn pending(&self, id: CounterId) -> Option<CounterRow> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.counter_id() == id)
            .map(Change::after)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(format!(
                "{} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and discard changes
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.changes.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }
}
