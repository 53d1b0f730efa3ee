//! # Key-Value Storage Port
//!
//! The storage abstraction the index layer writes through. Provides:
//!
//! - [`KvStore`]: the port trait (get/put/delete/has/batch/prefix scan)
//! - [`UpdateBatch`]: a staged set of writes and tombstones, flushed
//!   atomically through [`KvStore::write_batch`]
//! - [`MemKvStore`]: in-memory implementation for tests and tooling
//! - `RocksKvStore` (feature `rocksdb`): persistent implementation

pub mod batch;
pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod store;

pub use batch::UpdateBatch;
pub use error::KvError;
pub use memory::MemKvStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDbConfig, RocksKvStore};
pub use store::{BatchOperation, KvStore};
