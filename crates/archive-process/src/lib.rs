//! # Archive Process Layer
//!
//! Everything above the storage engine: the archive protocol state machine
//! ([`ChainProcessor`]), crash recovery, the compression gate, the typed
//! query surface, and the multi-chain service ([`ArchiveService`]) that
//! registers chains by genesis hash and owns their engine triples.
//!
//! ## Lifecycle
//!
//! A chain enters the service through [`ArchiveService::register_chain`]
//! with its genesis block; the service persists the registration in a
//! system KV store, opens the chain's segment log and index store, and
//! appends the genesis block. From then on the live chain streams
//! finalized blocks into [`ChainProcessor::archive_block`], strictly one
//! height at a time. On restart the service reloads every registered
//! chain and each processor reconciles the block log against the index
//! savepoint before serving queries.

pub mod archive;
pub mod config;
pub mod error;
pub mod latch;
pub mod manager;
pub mod processor;
pub mod query;
mod recover;

pub use config::{CompressFormat, StorageConfig};
pub use error::ProcessError;
pub use latch::{LatchGuard, ServerLatch};
pub use manager::{ArchiveService, ChainStatus, KvOpener, MemKvOpener, RegisterStatus};
#[cfg(feature = "rocksdb")]
pub use manager::RocksKvOpener;
pub use processor::ChainProcessor;
