//! In-memory [`KvStore`] used by tests and tooling.

use crate::error::KvError;
use crate::store::{BatchOperation, KvStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// BTreeMap-backed store. Keys come back from `prefix_scan` in sorted
/// order, matching the persistent backend.
#[derive(Debug, Default)]
pub struct MemKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl KvStore for MemKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        self.data.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        self.check_open()?;
        Ok(self.data.read().contains_key(key))
    }

    fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), KvError> {
        self.check_open()?;
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.check_open()?;
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn close(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
