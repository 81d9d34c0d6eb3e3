//! Storage boundary: the reads and writes civicsync needs from the backing store.

mod backend;
mod error;
mod memory;

pub use backend::{CompletenessStore, StatusUpsert, StatusWriter, SyncRecordStore};
pub use error::StoreError;
pub use memory::{Fixture, MemoryStore};
