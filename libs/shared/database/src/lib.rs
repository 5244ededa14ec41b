pub mod snapshot;
pub mod store;

pub use snapshot::{load_snapshot, save_snapshot};
pub use store::{InMemoryTable, Record, Repository, StoreError, Versioned};
