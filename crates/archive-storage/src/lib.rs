//! # Archive Storage Engine
//!
//! The core of the archive store: a segmented, checksummed, append-only
//! block log with a compression lifecycle, bridged to a key-value store
//! through a crash-safe two-phase index commit.
//!
//! ## Layers
//!
//! - [`SegmentLog`]: append-only binary record log split across
//!   height-ordered segment files; owns file I/O, checksums, and
//!   crash-truncation recovery.
//! - [`Compressor`]: pluggable compress/decompress primitive (7z
//!   subprocess or gzip).
//! - [`BinLog`]: the contract the index layer uses so the segment log and
//!   its test double are interchangeable.
//! - [`BlockIndexStore`] + [`StagingCache`]: height/hash/txid to
//!   `StoreInfo` mapping over a KV store, with two-phase commits staged in
//!   memory before the atomic flush.
//!
//! Write path: `SegmentLog::write` returns the entry's location plus a
//! segment boundary record when the write sealed a segment; the index
//! layer stages the full KV batch for that height (`commit_block` with
//! `cache=true`), then flushes it atomically (`cache=false`). Reads go
//! staged-cache first, then KV, then through
//! `find_or_decompress_store_info` to the log.

pub mod binlog;
pub mod cache;
pub mod compress;
pub mod error;
pub mod handle_cache;
pub mod index;
pub mod keys;
pub mod segment;

pub use binlog::{BinLog, MemBinLog, SegmentBoundary};
pub use cache::StagingCache;
pub use compress::{Compressor, Gzip, SevenZip};
pub use error::StorageError;
pub use index::{BlockIndexStore, FileMarker, IndexedBlock, TxLocation};
pub use segment::{CompressMethod, LogOptions, SegmentLog};
