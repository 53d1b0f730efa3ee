//! Bounded cache of open read-only file handles.
//!
//! Replaces an implicit LRU with an explicit recency-ordered map so every
//! eviction visibly closes its handle (dropping the `File` closes the
//! descriptor). The active `.END` segment is never inserted here; callers
//! serve it from memory.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct HandleCache {
    capacity: usize,
    // Front is least recently used.
    entries: VecDeque<(PathBuf, Arc<File>)>,
}

impl HandleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Fetch a cached handle, refreshing its recency.
    pub fn get(&mut self, path: &Path) -> Option<Arc<File>> {
        let idx = self.entries.iter().position(|(p, _)| p == path)?;
        let entry = self.entries.remove(idx)?;
        let handle = entry.1.clone();
        self.entries.push_back(entry);
        Some(handle)
    }

    /// Insert a handle, evicting (and thereby closing) the least recently
    /// used one when full.
    pub fn insert(&mut self, path: PathBuf, handle: Arc<File>) {
        if let Some(idx) = self.entries.iter().position(|(p, _)| *p == path) {
            self.entries.remove(idx);
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((path, handle));
    }

    /// Drop the handle for `path` if cached, closing it once the last
    /// outstanding reader finishes.
    pub fn remove(&mut self, path: &Path) {
        if let Some(idx) = self.entries.iter().position(|(p, _)| p == path) {
            self.entries.remove(idx);
        }
    }

    /// Close every cached handle.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap();
        path
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let mut cache = HandleCache::new(2);
        let a = touch(&dir, "a");
        let b = touch(&dir, "b");
        let c = touch(&dir, "c");

        cache.insert(a.clone(), Arc::new(File::open(&a).unwrap()));
        cache.insert(b.clone(), Arc::new(File::open(&b).unwrap()));
        cache.insert(c.clone(), Arc::new(File::open(&c).unwrap()));

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_get_refreshes_recency() {
        let dir = TempDir::new().unwrap();
        let mut cache = HandleCache::new(2);
        let a = touch(&dir, "a");
        let b = touch(&dir, "b");
        let c = touch(&dir, "c");

        cache.insert(a.clone(), Arc::new(File::open(&a).unwrap()));
        cache.insert(b.clone(), Arc::new(File::open(&b).unwrap()));
        // Touch `a` so `b` becomes the eviction candidate.
        assert!(cache.get(&a).is_some());
        cache.insert(c.clone(), Arc::new(File::open(&c).unwrap()));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut cache = HandleCache::new(2);
        let a = touch(&dir, "a");
        cache.insert(a.clone(), Arc::new(File::open(&a).unwrap()));
        cache.remove(&a);
        cache.remove(&a);
        assert!(cache.is_empty());
    }
}
