//! Storage configuration for the archive service.
//!
//! One [`StorageConfig`] covers the whole service; per-chain directories
//! are derived from `store_path`. The struct deserializes from whatever
//! config format the embedding binary uses.

use archive_storage::{CompressMethod, LogOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Compression backend selector, config-file friendly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressFormat {
    #[serde(rename = "7z")]
    SevenZip,
    Gzip,
}

impl From<CompressFormat> for CompressMethod {
    fn from(format: CompressFormat) -> Self {
        match format {
            CompressFormat::SevenZip => CompressMethod::SevenZip,
            CompressFormat::Gzip => CompressMethod::Gzip,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each chain gets `<store_path>/<chain_id>/` with
    /// `blocks/`, `compress/`, and `decompress/` beneath it.
    pub store_path: PathBuf,
    /// Target segment size in bytes.
    pub segment_size: usize,
    /// Skip fsync after block log writes.
    pub segment_async: bool,
    /// Maximum number of cached open segment read handles.
    pub handle_cache_size: usize,
    pub compress_format: CompressFormat,
    /// How long a compressed original or decompressed copy must sit
    /// unread before a reap pass may delete it (seconds).
    pub retain_seconds: i64,
    /// Deadline for one compression subprocess run (seconds).
    pub compress_seconds: u64,
    /// Interval between reap passes (seconds).
    pub scan_interval_seconds: u64,
    /// Maximum number of blocks one range query may span.
    pub max_query_range: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("archive-data"),
            segment_size: 64 * 1024 * 1024,
            segment_async: false,
            handle_cache_size: 25,
            compress_format: CompressFormat::SevenZip,
            retain_seconds: 10 * 3600,
            compress_seconds: 2000,
            scan_interval_seconds: 600,
            max_query_range: 1000,
        }
    }
}

impl StorageConfig {
    /// Tiny segments, gzip, long reap interval. For tests only.
    pub fn for_testing(root: impl Into<PathBuf>, segment_size: usize) -> Self {
        Self {
            store_path: root.into(),
            segment_size,
            segment_async: true,
            handle_cache_size: 4,
            compress_format: CompressFormat::Gzip,
            retain_seconds: -1,
            compress_seconds: 60,
            // Keep the reapers idle so tests drive reaping explicitly.
            scan_interval_seconds: 3600,
            max_query_range: 100,
        }
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            no_sync: self.segment_async,
            segment_size: self.segment_size,
            handle_cache_size: self.handle_cache_size,
            compress_method: self.compress_format.into(),
            retain_seconds: self.retain_seconds,
            max_compress_seconds: self.compress_seconds,
        }
    }

    /// `(log, compress, decompress)` directories for one chain.
    pub fn chain_dirs(&self, chain_id: &str) -> (PathBuf, PathBuf, PathBuf) {
        let root = self.store_path.join(chain_id);
        (
            root.join("blocks"),
            root.join("compress"),
            root.join("decompress"),
        )
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }
}
