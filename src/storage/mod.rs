pub mod fault;
pub mod memory;
pub mod persistence;

pub use fault::{FaultInjector, FaultPoint};
pub use memory::{InMemoryStorage, Snapshot, TableState};
pub use persistence::{DurabilityMode, Journal, JournalEntry, Recovered};
