//! In-memory staging of not-yet-flushed index batches.
//!
//! Each pending batch holds the complete set of KV mutations for one
//! block height. Until the flush phase lands, these batches are the sole
//! source of truth for their heights: lookups scan pending heights from
//! highest to lowest so a reader always sees the most recently staged
//! write, and a staged tombstone (`None`) must read as deleted, not as
//! absent.

use archive_kv::{BatchOperation, UpdateBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
pub struct StagingCache {
    pending: RwLock<BTreeMap<u64, UpdateBatch>>,
}

impl StagingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `batch` as the pending mutations for `height`.
    pub fn insert(&self, height: u64, batch: UpdateBatch) {
        debug!("[archive] staged index batch for height {height}");
        self.pending.write().insert(height, batch);
    }

    /// Remove and return the pending batch for `height`.
    pub fn take(&self, height: u64) -> Option<UpdateBatch> {
        self.pending.write().remove(&height)
    }

    /// Snapshot the operations staged for `height` without evicting the
    /// batch, so a failed flush leaves the staging intact.
    pub fn operations(&self, height: u64) -> Option<Vec<BatchOperation>> {
        self.pending.read().get(&height).map(|b| b.operations())
    }

    /// Staged value for `key`, newest height first. `Some(None)` is a
    /// staged tombstone, `None` means no pending batch touched the key.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let pending = self.pending.read();
        for batch in pending.values().rev() {
            if let Some(value) = batch.get(key) {
                return Some(value.map(|v| v.to_vec()));
            }
        }
        None
    }

    /// Three-way presence check mirroring [`StagingCache::get`].
    pub fn has(&self, key: &[u8]) -> Option<bool> {
        let pending = self.pending.read();
        for batch in pending.values().rev() {
            if let Some(value) = batch.get(key) {
                return Some(value.is_some());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }

    pub fn clear(&self) {
        self.pending.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_with(key: &[u8], value: Option<&[u8]>) -> UpdateBatch {
        let mut batch = UpdateBatch::new();
        match value {
            Some(v) => batch.put(key.to_vec(), v.to_vec()),
            None => batch.delete(key.to_vec()),
        }
        batch
    }

    #[test]
    fn test_newest_staged_write_wins() {
        let cache = StagingCache::new();
        cache.insert(5, batch_with(b"k", Some(b"old")));
        cache.insert(6, batch_with(b"k", Some(b"new")));
        assert_eq!(cache.get(b"k"), Some(Some(b"new".to_vec())));
    }

    #[test]
    fn test_tombstone_distinguished_from_absence() {
        let cache = StagingCache::new();
        cache.insert(3, batch_with(b"gone", None));
        assert_eq!(cache.get(b"gone"), Some(None));
        assert_eq!(cache.has(b"gone"), Some(false));
        assert_eq!(cache.get(b"never"), None);
        assert_eq!(cache.has(b"never"), None);
    }

    #[test]
    fn test_take_evicts_exactly_one_height() {
        let cache = StagingCache::new();
        cache.insert(1, batch_with(b"a", Some(b"1")));
        cache.insert(2, batch_with(b"b", Some(b"2")));
        assert!(cache.take(1).is_some());
        assert!(cache.take(1).is_none());
        assert_eq!(cache.get(b"a"), None);
        assert_eq!(cache.get(b"b"), Some(Some(b"2".to_vec())));
    }
}
