use crate::core::{Counter, CounterId, CounterRow, DbError, Result};
use crate::storage::{
    DurabilityMode, FaultInjector, FaultPoint, InMemoryStorage, Journal, JournalEntry, Snapshot,
};
use crate::transaction::{
    Change, Transaction, TransactionId, TransactionManager, TransactionMode, TransactionState,
    WriteIntent,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Transactional counter store.
///
/// Cheap to clone; every clone shares the same table, lock and journal. Each
/// test or harness run builds its own instance, there is no global store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: InMemoryStorage,
    transactions: TransactionManager,
    journal: Option<Mutex<Journal>>,
    faults: Arc<FaultInjector>,
}

/// Point-in-time store counters, mostly for tests and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active_transactions: usize,
    pub committed: u64,
    pub aborted: u64,
    pub commit_seq: u64,
    pub write_intent_holder: Option<TransactionId>,
    pub faults_triggered: u64,
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub txn_id: TransactionId,
    /// `None` for read-only transactions, which install nothing
    pub commit_seq: Option<u64>,
    pub rows_written: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Purely in-memory store
    pub fn new() -> Self {
        Self::with_parts(InMemoryStorage::new(), None, Arc::new(FaultInjector::new()))
    }

    /// Open a store backed by a journal file, replaying whatever it holds
    pub async fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let faults = Arc::new(FaultInjector::new());
        let journal = Journal::open(path, durability_mode)?.with_faults(Arc::clone(&faults));
        let recovered = journal.recover()?;
        debug!(
            path = %journal.path().display(),
            entries = recovered.entries,
            commit_seq = recovered.commit_seq,
            "journal recovered"
        );
        let storage = InMemoryStorage::with_rows(recovered.rows, recovered.commit_seq);
        Ok(Self::with_parts(storage, Some(journal), faults))
    }

    fn with_parts(
        storage: InMemoryStorage,
        journal: Option<Journal>,
        faults: Arc<FaultInjector>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                storage,
                transactions: TransactionManager::new(),
                journal: journal.map(Mutex::new),
                faults,
            }),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// Create or overwrite a counter. Waits for the write intent, so it never
    /// lands in the middle of another writer's transaction.
    pub async fn reset(&self, counter: Counter) -> Result<()> {
        let intent = self
            .inner
            .transactions
            .acquire_write_intent(TransactionId::new())
            .await;
        if let Some(journal) = &self.inner.journal {
            journal.lock().await.append(&JournalEntry::reset(counter))?;
        }
        let seq = self.inner.storage.put(counter).await;
        drop(intent);
        debug!(counter = %counter.id, value = counter.row.value, version = ?counter.row.version, seq, "counter reset");
        Ok(())
    }

    /// Alias of [`Store::reset`] used during setup
    pub async fn seed(&self, counter: Counter) -> Result<()> {
        self.reset(counter).await
    }

    /// Auto-commit read of the latest committed row
    pub async fn read(&self, id: CounterId) -> Result<CounterRow> {
        self.inner.faults.check(FaultPoint::Read)?;
        self.inner.storage.latest(id).await
    }

    /// All committed counters
    pub async fn counters(&self) -> Vec<Counter> {
        self.inner.storage.snapshot().await.counters().collect()
    }

    /// Begin a transaction that holds the write intent from the start.
    ///
    /// Waits until any other writer's transaction commits or rolls back.
    pub async fn begin_exclusive(&self) -> Result<StoreTransaction> {
        self.inner.faults.check(FaultPoint::Begin)?;
        let id = self.inner.transactions.begin();
        let mut txn = StoreTransaction::new(Arc::clone(&self.inner), id, TransactionMode::Exclusive);
        debug!(txn = %id, "waiting for write intent");
        let intent = self.inner.transactions.acquire_write_intent(id).await;
        txn.intent_seq = Some(self.inner.storage.commit_seq().await);
        txn.intent = Some(intent);
        debug!(txn = %id, "write intent acquired");
        Ok(txn)
    }

    /// Begin a transaction without taking any lock.
    pub async fn begin_deferred(&self) -> Result<StoreTransaction> {
        self.inner.faults.check(FaultPoint::Begin)?;
        let id = self.inner.transactions.begin();
        debug!(txn = %id, "deferred transaction started");
        Ok(StoreTransaction::new(
            Arc::clone(&self.inner),
            id,
            TransactionMode::Deferred,
        ))
    }

    pub async fn stats(&self) -> StoreStats {
        let manager = &self.inner.transactions;
        StoreStats {
            active_transactions: manager.active_count(),
            committed: manager.committed_count(),
            aborted: manager.aborted_count(),
            commit_seq: self.inner.storage.commit_seq().await,
            write_intent_holder: manager.write_intent_holder(),
            faults_triggered: self.inner.faults.triggered(),
        }
    }
}

/// Handle to one open transaction.
///
/// `commit` and `rollback` consume the handle. Dropping a handle that is still
/// active rolls it back and releases the write intent.
pub struct StoreTransaction {
    store: Arc<StoreInner>,
    txn: Transaction,
    intent: Option<WriteIntent>,
    // Commit sequence observed when the write intent was taken.
    intent_seq: Option<u64>,
}

impl StoreTransaction {
    fn new(store: Arc<StoreInner>, id: TransactionId, mode: TransactionMode) -> Self {
        Self {
            store,
            txn: Transaction::new(id, mode),
            intent: None,
            intent_seq: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.txn.id()
    }

    pub fn mode(&self) -> TransactionMode {
        self.txn.mode()
    }

    pub fn state(&self) -> TransactionState {
        self.txn.state()
    }

    pub fn holds_write_intent(&self) -> bool {
        self.intent.is_some()
    }

    async fn pinned_snapshot(&mut self) -> Snapshot {
        if let Some(snapshot) = self.txn.snapshot() {
            return Arc::clone(snapshot);
        }
        let snapshot = self.store.storage.snapshot().await;
        Arc::clone(self.txn.pin_snapshot(snapshot))
    }

    /// Read a counter as this transaction sees it: its own pending write if
    /// any, otherwise the snapshot fixed by the first statement.
    pub async fn read(&mut self, id: CounterId) -> Result<CounterRow> {
        self.txn.ensure_active()?;
        self.store.faults.check(FaultPoint::Read)?;
        if let Some(row) = self.txn.pending(id) {
            return Ok(row);
        }
        let snapshot = self.pinned_snapshot().await;
        snapshot.get(id).ok_or(DbError::CounterNotFound(id))
    }

    /// Decrement a counter by one.
    ///
    /// With `expected_version`, the write (and its version bump) only happens
    /// if the stored version still equals it; returns rows affected, 0 or 1.
    /// Without it the decrement is unconditional.
    pub async fn write_decrement(
        &mut self,
        id: CounterId,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.txn.ensure_active()?;
        self.store.faults.check(FaultPoint::Write)?;
        let snapshot = self.pinned_snapshot().await;
        self.ensure_write_intent().await?;

        let pending = self.txn.pending(id);
        let base = match pending {
            Some(row) => row,
            None => self.store.storage.latest(id).await?,
        };
        if pending.is_none()
            && let Some(reset_seq) = self.store.storage.reset_seq(id).await
            && reset_seq > snapshot.commit_seq()
        {
            return Err(DbError::WriteConflict(format!(
                "counter {} was reset at seq {} after this transaction's snapshot (seq {})",
                id,
                reset_seq,
                snapshot.commit_seq()
            )));
        }

        match expected_version {
            Some(expected) => match base.version {
                None => return Err(DbError::Unversioned(id)),
                Some(current) if current != expected => {
                    debug!(txn = %self.id(), counter = %id, expected, current, "version mismatch");
                    return Ok(0);
                }
                Some(_) => {}
            },
            None => {
                let latest_seq = self.store.storage.commit_seq().await;
                if pending.is_none()
                    && self.mode() == TransactionMode::Deferred
                    && snapshot.commit_seq() != latest_seq
                {
                    return Err(DbError::WriteConflict(format!(
                        "snapshot at seq {} is stale, store is at seq {}",
                        snapshot.commit_seq(),
                        latest_seq
                    )));
                }
            }
        }

        let Some(after) = base.decremented() else {
            error!(txn = %self.id(), counter = %id, value = base.value, "decrement below zero");
            return Err(DbError::InvariantViolation(format!(
                "counter {} would go below zero (value {})",
                id, base.value
            )));
        };
        self.txn.record_change(Change::Decrement {
            id,
            before: base,
            after,
        })?;
        Ok(1)
    }

    async fn ensure_write_intent(&mut self) -> Result<()> {
        if self.intent.is_some() {
            return Ok(());
        }
        let manager = &self.store.transactions;
        match manager.try_write_intent(self.id()) {
            Some(intent) => {
                self.intent_seq = Some(self.store.storage.commit_seq().await);
                self.intent = Some(intent);
                debug!(txn = %self.id(), "write intent acquired on first write");
                Ok(())
            }
            None => {
                let holder = manager
                    .write_intent_holder()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "another transaction".to_string());
                Err(DbError::WriteConflict(format!("store is locked by {}", holder)))
            }
        }
    }

    /// Commit the transaction. On failure it is rolled back before the error
    /// is returned.
    pub async fn commit(mut self) -> Result<CommitInfo> {
        self.txn.ensure_active()?;
        match self.try_commit().await {
            Ok(info) => Ok(info),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    async fn try_commit(&mut self) -> Result<CommitInfo> {
        self.store.faults.check(FaultPoint::Commit)?;
        let id = self.id();

        if self.txn.change_count() == 0 {
            self.txn.commit()?;
            self.finish(TransactionState::Committed);
            debug!(txn = %id, "read-only commit");
            return Ok(CommitInfo {
                txn_id: id,
                commit_seq: None,
                rows_written: 0,
            });
        }

        if self.intent.is_none() {
            return Err(DbError::WriteConflict(format!(
                "{} has pending writes without the write intent",
                id
            )));
        }
        let current_seq = self.store.storage.commit_seq().await;
        if self.intent_seq != Some(current_seq) {
            return Err(DbError::WriteConflict(format!(
                "a concurrent writer committed first (seq {:?} -> {})",
                self.intent_seq, current_seq
            )));
        }

        let mut rows = BTreeMap::new();
        for change in self.txn.changes() {
            rows.insert(change.counter_id(), change.after());
        }
        let rows: Vec<Counter> = rows
            .into_iter()
            .map(|(id, row)| Counter { id, row })
            .collect();
        let rows_written = rows.len();

        if let Some(journal) = &self.store.journal {
            journal
                .lock()
                .await
                .append(&JournalEntry::commit(id.as_u64(), current_seq + 1, rows))?;
        }
        let seq = self.store.storage.install(self.txn.changes()).await?;

        self.txn.commit()?;
        self.finish(TransactionState::Committed);
        debug!(txn = %id, seq, rows_written, "committed");
        Ok(CommitInfo {
            txn_id: id,
            commit_seq: Some(seq),
            rows_written,
        })
    }

    /// Discard pending writes and release the write intent
    pub async fn rollback(mut self) -> Result<()> {
        self.txn.ensure_active()?;
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        if !self.txn.state().is_active() {
            return;
        }
        if let Err(err) = self.txn.rollback() {
            warn!(txn = %self.id(), error = %err, "rollback bookkeeping failed");
        }
        self.finish(TransactionState::Aborted);
        debug!(txn = %self.id(), "rolled back");
    }

    fn finish(&mut self, outcome: TransactionState) {
        self.intent = None;
        self.store.transactions.finish(self.txn.id(), outcome);
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if self.txn.state().is_active() {
            debug!(txn = %self.id(), "transaction dropped while active");
            self.abort();
        }
    }
}
