use crate::core::{Counter, CounterId, CounterRow, DbError, Result};
use crate::transaction::Change;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Committed contents of the counter table at one commit sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableState {
    rows: BTreeMap<CounterId, CounterRow>,
    commit_seq: u64,
    // Commit sequence of the latest reset per counter
    reset_at: BTreeMap<CounterId, u64>,
}

impl TableState {
    pub fn get(&self, id: CounterId) -> Option<CounterRow> {
        self.rows.get(&id).copied()
    }

    /// Number of commits (and resets) installed so far
    pub fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    pub fn counters(&self) -> impl Iterator<Item = Counter> + '_ {
        self.rows.iter().map(|(id, row)| Counter { id: *id, row: *row })
    }

    /// Commit sequence at which `id` was last reset in this process
    pub fn reset_seq(&self, id: CounterId) -> Option<u64> {
        self.reset_at.get(&id).copied()
    }
}

/// Immutable view handed to transactions; cloning is O(1).
pub type Snapshot = Arc<TableState>;

/// In-memory counter table.
///
/// Readers grab the current `Arc` and never block writers for longer than the
/// pointer swap. Writers build the next state copy-on-write and swap it in.
/// Callers must hold the write intent before calling `install`/`put`.
pub struct InMemoryStorage {
    state: RwLock<Snapshot>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::from_state(TableState::default())
    }

    fn from_state(state: TableState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Current committed state
    pub async fn snapshot(&self) -> Snapshot {
        Arc::clone(&*self.state.read().await)
    }

    /// Latest committed row
    pub async fn latest(&self, id: CounterId) -> Result<CounterRow> {
        self.state
            .read()
            .await
            .get(id)
            .ok_or(DbError::CounterNotFound(id))
    }

    pub async fn reset_seq(&self, id: CounterId) -> Option<u64> {
        self.state.read().await.reset_seq(id)
    }

    pub async fn commit_seq(&self) -> u64 {
        self.state.read().await.commit_seq
    }

    /// Apply a transaction's buffered changes, returning the new commit sequence
    pub async fn install(&self, changes: &[Change]) -> Result<u64> {
        let mut current = self.state.write().await;
        let mut next = (**current).clone();
        for change in changes {
            let id = change.counter_id();
            if !next.rows.contains_key(&id) {
                return Err(DbError::CounterNotFound(id));
            }
            next.rows.insert(id, change.after());
        }
        next.commit_seq += 1;
        let seq = next.commit_seq;
        *current = Arc::new(next);
        Ok(seq)
    }

    /// Create or overwrite a counter
    pub async fn put(&self, counter: Counter) -> u64 {
        let mut current = self.state.write().await;
        let mut next = (**current).clone();
        next.rows.insert(counter.id, counter.row);
        next.commit_seq += 1;
        let seq = next.commit_seq;
        next.reset_at.insert(counter.id, seq);
        *current = Arc::new(next);
        seq
    }

    /// Rebuild from rows recovered out of a journal
    pub(crate) fn with_rows(rows: BTreeMap<CounterId, CounterRow>, commit_seq: u64) -> Self {
        Self::from_state(TableState {
            rows,
            commit_seq,
            reset_at: BTreeMap::new(),
        })
    }
}
