//! RocksDB-backed [`KvStore`].
//!
//! Tuned for the archive workload: bulk sequential writes during
//! archiving, point reads plus short prefix scans during queries. Snappy
//! compression, bloom filters, level compaction.

use crate::error::KvError;
use crate::store::{BatchOperation, KvStore};
use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: String,
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
    /// fsync after each write.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/archive-index".to_string(),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Smaller buffers, no sync. For tests only.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

/// Persistent store for block index entries and lifecycle markers.
pub struct RocksKvStore {
    db: RwLock<Option<DB>>,
    config: RocksDbConfig,
}

impl RocksKvStore {
    /// Open or create the database at `config.path`.
    pub fn open(config: RocksDbConfig) -> Result<Self, KvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path)
            .map_err(|e| KvError::Io(format!("failed to open rocksdb: {e}")))?;

        Ok(Self {
            db: RwLock::new(Some(db)),
            config,
        })
    }

    fn write_opts(&self) -> rocksdb::WriteOptions {
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl KvStore for RocksKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        db.get(key)
            .map_err(|e| KvError::Io(format!("rocksdb get failed: {e}")))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        db.put_opt(key, value, &self.write_opts())
            .map_err(|e| KvError::Io(format!("rocksdb put failed: {e}")))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        db.delete_opt(key, &self.write_opts())
            .map_err(|e| KvError::Io(format!("rocksdb delete failed: {e}")))
    }

    fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        db.get_pinned(key)
            .map(|v| v.is_some())
            .map_err(|e| KvError::Io(format!("rocksdb exists check failed: {e}")))
    }

    fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }
        db.write_opt(batch, &self.write_opts())
            .map_err(|e| KvError::Io(format!("rocksdb batch write failed: {e}")))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(KvError::Closed)?;
        let mut results = Vec::new();
        let iter = db.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) =
                item.map_err(|e| KvError::Io(format!("rocksdb scan failed: {e}")))?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn close(&self) -> Result<(), KvError> {
        // Dropping the DB flushes memtables and releases the lock file.
        let mut guard = self.db.write();
        guard.take();
        Ok(())
    }
}
