//! Staged batch of writes, flushed atomically through a [`KvStore`].

use crate::store::{BatchOperation, KvStore};
use crate::KvError;
use std::collections::HashMap;

/// A set of pending writes and deletes keyed by raw bytes.
///
/// `None` values are tombstones. The batch is also readable, so staged
/// data can serve queries before the flush lands (see the staging cache
/// in the index layer).
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    entries: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl UpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all staged entries so the batch can be reused from a pool.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), None);
    }

    /// Staged value for `key`: `Some(Some(v))` if written, `Some(None)` if
    /// tombstoned, `None` if the batch never touched the key.
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.entries.get(key).map(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert the staged entries into batch operations.
    pub fn operations(&self) -> Vec<BatchOperation> {
        self.entries
            .iter()
            .map(|(key, value)| match value {
                Some(v) => BatchOperation::put(key.clone(), v.clone()),
                None => BatchOperation::delete(key.clone()),
            })
            .collect()
    }

    /// Flush the batch atomically into `store`.
    pub fn write_to(&self, store: &dyn KvStore) -> Result<(), KvError> {
        store.write_batch(self.operations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemKvStore;

    #[test]
    fn test_last_write_wins_per_key() {
        let mut batch = UpdateBatch::new();
        batch.put(b"k".to_vec(), b"v1".to_vec());
        batch.put(b"k".to_vec(), b"v2".to_vec());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(b"k"), Some(Some(b"v2".as_ref())));

        batch.delete(b"k".to_vec());
        assert_eq!(batch.get(b"k"), Some(None));
    }

    #[test]
    fn test_flush_applies_puts_and_tombstones() {
        let store = MemKvStore::new();
        store.put(b"gone", b"old").unwrap();

        let mut batch = UpdateBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"gone".to_vec());
        batch.write_to(&store).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"gone").unwrap(), None);
    }

    #[test]
    fn test_reset_empties_batch() {
        let mut batch = UpdateBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.get(b"a"), None);
    }
}
