// ============================================================================
// Transaction Manager
// ============================================================================
//
// Owns the store-wide write intent (the "reserved" lock) and the registry of
// open transactions. At most one transaction holds the write intent at any
// instant; it is released when the holder's guard is dropped, which the store
// does on commit, rollback and drop of the transaction handle.
//
// ============================================================================

use super::{TransactionId, TransactionState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Proof that the holder owns the write intent. Dropping it releases the lock.
#[derive(Debug)]
pub struct WriteIntent {
    holder: TransactionId,
    _guard: OwnedMutexGuard<()>,
    holders: Arc<Mutex<Option<TransactionId>>>,
}

impl WriteIntent {
    pub fn holder(&self) -> TransactionId {
        self.holder
    }
}

impl Drop for WriteIntent {
    fn drop(&mut self) {
        let mut holder = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        if *holder == Some(self.holder) {
            *holder = None;
        }
    }
}

pub struct TransactionManager {
    write_intent: Arc<AsyncMutex<()>>,

    // Diagnostic only: who currently owns the write intent.
    holder: Arc<Mutex<Option<TransactionId>>>,

    active: Mutex<HashSet<TransactionId>>,

    committed: AtomicU64,
    aborted: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            write_intent: Arc::new(AsyncMutex::new(())),
            holder: Arc::new(Mutex::new(None)),
            active: Mutex::new(HashSet::new()),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        }
    }

    /// Register a new transaction and return its id
    pub fn begin(&self) -> TransactionId {
        let id = TransactionId::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        id
    }

    /// Wait for the write intent. This is the only blocking point of the
    /// exclusive path.
    pub async fn acquire_write_intent(&self, txn_id: TransactionId) -> WriteIntent {
        let guard = Arc::clone(&self.write_intent).lock_owned().await;
        self.install_holder(txn_id, guard)
    }

    /// Take the write intent only if nobody holds it.
    pub fn try_write_intent(&self, txn_id: TransactionId) -> Option<WriteIntent> {
        let guard = Arc::clone(&self.write_intent).try_lock_owned().ok()?;
        Some(self.install_holder(txn_id, guard))
    }

    fn install_holder(&self, txn_id: TransactionId, guard: OwnedMutexGuard<()>) -> WriteIntent {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(txn_id);
        WriteIntent {
            holder: txn_id,
            _guard: guard,
            holders: Arc::clone(&self.holder),
        }
    }

    /// Transaction currently holding the write intent, if any
    pub fn write_intent_holder(&self) -> Option<TransactionId> {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a transaction from the registry. Safe to call from `Drop`.
    pub fn finish(&self, txn_id: TransactionId, outcome: TransactionState) {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&txn_id);
        if !removed {
            return;
        }
        match outcome {
            TransactionState::Committed => {
                self.committed.fetch_add(1, Ordering::SeqCst);
            }
            TransactionState::Aborted => {
                self.aborted.fetch_add(1, Ordering::SeqCst);
            }
            TransactionState::Active => {}
        }
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn committed_count(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn aborted_count(&self) -> u64 {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_intent_is_exclusive() {
        let manager = TransactionManager::new();
        let t1 = manager.begin();
        let t2 = manager.begin();

        let intent = manager.acquire_write_intent(t1).await;
        assert_eq!(manager.write_intent_holder(), Some(t1));
        assert!(manager.try_write_intent(t2).is_none());

        drop(intent);
        assert_eq!(manager.write_intent_holder(), None);
        let second = manager.try_write_intent(t2).expect("intent should be free");
        assert_eq!(second.holder(), t2);
    }

    #[test]
    fn test_finish_counts_once() {
        let manager = TransactionManager::new();
        let id = manager.begin();
        assert_eq!(manager.active_count(), 1);

        manager.finish(id, TransactionState::Aborted);
        manager.finish(id, TransactionState::Aborted);

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.aborted_count(), 1);
        assert_eq!(manager.committed_count(), 0);
    }
}
