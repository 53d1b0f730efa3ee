//! The key-value port trait and its batch operation type.

use crate::error::KvError;

/// One operation inside an atomic batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Port trait for the key-value backend the index layer writes through.
///
/// Implementations use interior mutability; the index layer shares one
/// store across threads behind an `Arc`.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    fn has(&self, key: &[u8]) -> Result<bool, KvError>;

    /// Apply all operations atomically. Either every operation lands or
    /// none do.
    fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), KvError>;

    /// All key/value pairs whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Release backend resources. Operations after close return
    /// [`KvError::Closed`].
    fn close(&self) -> Result<(), KvError>;
}
