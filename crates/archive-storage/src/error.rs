//! Storage engine error taxonomy.

use thiserror::Error;

/// Errors raised by the block log, the compression lifecycle, and the
/// index layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Checksum or length mismatch. Tolerated only as a restart-time
    /// truncation signal; fatal when raised against a sealed file.
    #[error("log corrupt: {0}")]
    Corrupt(&'static str),

    /// Operation on a closed log or store.
    #[error("log closed")]
    Closed,

    /// Write index is not `last_index + 1`. Caller defect, never retried.
    #[error("out of order write: expected index {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    /// A required entry or file is missing.
    #[error("not found")]
    NotFound,

    /// A read was issued with an unusable location handle.
    #[error("invalid file index: {0}")]
    InvalidIndex(String),

    /// The written span does not match the expected entry size.
    #[error("block write size mismatch: expected {expected}, wrote {actual}")]
    WriteSizeMismatch { expected: usize, actual: usize },

    /// Requested compression at or below the persisted marker.
    #[error("height already compressed, marker at {0}")]
    AlreadyCompressed(u64),

    /// The flush phase found no staged batch for its height. Indicates a
    /// bug in the commit protocol, not a transient condition.
    #[error("staged index batch missing for height {0}")]
    StagedBatchMissing(u64),

    /// Compression or decompression subprocess failure.
    #[error("compression failed: {0}")]
    Compression(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Kv(#[from] archive_kv::KvError),

    #[error(transparent)]
    Serialization(#[from] archive_types::TypesError),
}
