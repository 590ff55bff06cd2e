// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transactions run against copy-on-write snapshots of the counter table.
// Writers are serialized by a single store-wide write intent:
// - Exclusive transactions wait for it at BEGIN (pessimistic locking)
// - Deferred transactions try it on their first write and fail fast with a
//   write conflict when it is taken (optimistic locking)
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{TransactionManager, WriteIntent};
pub use state::{Transaction, TransactionId, TransactionMode, TransactionState};
