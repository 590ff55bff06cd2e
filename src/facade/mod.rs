pub mod store;

pub use store::{CommitInfo, Store, StoreStats, StoreTransaction};
