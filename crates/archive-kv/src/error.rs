//! Error type for the key-value port.

use thiserror::Error;

/// Errors surfaced by a [`crate::KvStore`] implementation.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backing store failed an I/O operation.
    #[error("kv io error: {0}")]
    Io(String),

    /// The store was used after `close`.
    #[error("kv store is closed")]
    Closed,
}
