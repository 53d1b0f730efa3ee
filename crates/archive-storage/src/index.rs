//! # Block Index Store
//!
//! Maps heights, block hashes, and transaction ids to `StoreInfo`
//! locations in the block log, backed by a key-value store. Commits are
//! two-phase: the full KV batch for one height is staged in the
//! [`StagingCache`] (`cache=true`), then flushed atomically and evicted
//! (`cache=false`). Every read of log-resident data goes through
//! [`BlockIndexStore::find_or_decompress_store_info`] so compressed
//! segments are restored transparently.

use crate::binlog::BinLog;
use crate::cache::StagingCache;
use crate::error::StorageError;
use crate::keys;
use crate::SegmentBoundary;
use archive_kv::{KvStore, UpdateBatch};
use archive_types::{
    deserialize_block, deserialize_meta, BlockHeader, BlockWithRwSet, Hash, SectionSpan,
    SerializedBlockParts, SerializedMeta, StoreInfo, Transaction, TxRwSet, TypesError,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Where one transaction lives: its block plus the byte span of the
/// transaction itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub block_height: u64,
    pub block_hash: Hash,
    pub tx_index: u32,
    pub block_timestamp: i64,
    pub store_info: StoreInfo,
}

/// JSON marker persisted per compressed original / decompressed copy,
/// consumed by the reapers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMarker {
    pub file_name: String,
    pub created_at: i64,
}

/// One block as appended to the log, ready for indexing: the bundle, the
/// payload section spans, the log location, and the boundary record of a
/// segment this write may have sealed.
#[derive(Debug, Clone)]
pub struct IndexedBlock {
    pub bundle: BlockWithRwSet,
    pub meta_span: SectionSpan,
    pub tx_spans: Vec<SectionSpan>,
    pub rw_spans: Vec<SectionSpan>,
    pub location: StoreInfo,
    pub boundary: SegmentBoundary,
}

impl IndexedBlock {
    pub fn new(
        bundle: BlockWithRwSet,
        parts: &SerializedBlockParts,
        location: StoreInfo,
        boundary: SegmentBoundary,
    ) -> Self {
        Self {
            bundle,
            meta_span: parts.meta,
            tx_spans: parts.txs.clone(),
            rw_spans: parts.rwsets.clone(),
            location,
            boundary,
        }
    }

    fn height(&self) -> u64 {
        self.bundle.block.header.block_height
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value).map_err(TypesError::from)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes).map_err(TypesError::from)?)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct BlockIndexStore {
    chain_id: String,
    kv: Arc<dyn KvStore>,
    binlog: Arc<dyn BinLog>,
    cache: StagingCache,
    batch_pool: Mutex<Vec<UpdateBatch>>,
    // Serializes decompress-on-demand so one file is never decompressed
    // twice concurrently.
    decompress_lock: Mutex<()>,
}

impl BlockIndexStore {
    pub fn new(chain_id: impl Into<String>, kv: Arc<dyn KvStore>, binlog: Arc<dyn BinLog>) -> Self {
        Self {
            chain_id: chain_id.into(),
            kv,
            binlog,
            cache: StagingCache::new(),
            batch_pool: Mutex::new(Vec::new()),
            decompress_lock: Mutex::new(()),
        }
    }

    pub fn binlog(&self) -> &Arc<dyn BinLog> {
        &self.binlog
    }

    // ===== Two-phase commit =====

    /// Stage (`is_cache=true`) or flush (`is_cache=false`) the index batch
    /// for one block.
    pub fn commit_block(&self, block: &IndexedBlock, is_cache: bool) -> Result<(), StorageError> {
        if is_cache {
            self.commit_cache(block)
        } else {
            self.commit_db(block.height())
        }
    }

    /// Stage then immediately flush; used for the genesis block.
    pub fn init_genesis(&self, block: &IndexedBlock) -> Result<(), StorageError> {
        self.commit_block(block, true)?;
        self.commit_block(block, false)
    }

    fn acquire_batch(&self) -> UpdateBatch {
        let mut batch = self.batch_pool.lock().pop().unwrap_or_default();
        batch.reset();
        batch
    }

    fn commit_cache(&self, block: &IndexedBlock) -> Result<(), StorageError> {
        let height = block.height();
        let header = &block.bundle.block.header;
        let mut batch = self.acquire_batch();

        // Segment begin to end mapping, only when this write sealed one.
        if block.boundary.need_record {
            batch.put(
                keys::segment_map_key(block.boundary.begin_height),
                keys::encode_height(block.boundary.end_height).to_vec(),
            );
        }

        batch.put(keys::LAST_HEIGHT_KEY.to_vec(), keys::encode_height(height).to_vec());
        batch.put(keys::block_index_key(height), encode(&block.location)?);
        batch.put(
            keys::block_meta_index_key(height),
            encode(&block.location.nested(block.meta_span.offset, block.meta_span.byte_len))?,
        );
        batch.put(
            keys::block_hash_key(&header.block_hash),
            keys::encode_height(height).to_vec(),
        );

        // Per-transaction entries are independent; build them in parallel
        // and join before finalizing the batch.
        let tx_entries: Vec<(Vec<u8>, Vec<u8>)> = block
            .bundle
            .block
            .txs
            .par_iter()
            .enumerate()
            .map(|(i, tx)| {
                let span = block.tx_spans[i];
                let tx_location = TxLocation {
                    block_height: height,
                    block_hash: header.block_hash,
                    tx_index: i as u32,
                    block_timestamp: header.block_timestamp,
                    store_info: block.location.nested(span.offset, span.byte_len),
                };
                Ok((keys::tx_info_key(&tx.tx_id), encode(&tx_location)?))
            })
            .collect::<Result<_, StorageError>>()?;
        for (key, value) in tx_entries {
            batch.put(key, value);
        }

        for (i, rwset) in block.bundle.rwsets.iter().enumerate() {
            let span = block.rw_spans[i];
            batch.put(
                keys::rwset_index_key(&rwset.tx_id),
                encode(&block.location.nested(span.offset, span.byte_len))?,
            );
        }

        if block.bundle.block.is_config_block() {
            batch.put(
                keys::LAST_CONFIG_HEIGHT_KEY.to_vec(),
                keys::encode_height(height).to_vec(),
            );
            info!(
                "[archive] chain {} staged config block at height {height}",
                self.chain_id
            );
        }

        let entries = batch.len();
        self.cache.insert(height, batch);
        debug!(
            "[archive] chain {} staged index batch for height {height}, {entries} entries",
            self.chain_id
        );
        Ok(())
    }

    fn commit_db(&self, height: u64) -> Result<(), StorageError> {
        let operations = self
            .cache
            .operations(height)
            .ok_or(StorageError::StagedBatchMissing(height))?;
        self.kv.write_batch(operations)?;
        // Evict only after the flush landed, then recycle the batch.
        if let Some(batch) = self.cache.take(height) {
            self.batch_pool.lock().push(batch);
        }
        debug!(
            "[archive] chain {} flushed index batch for height {height}",
            self.chain_id
        );
        Ok(())
    }

    // ===== Staged-first lookups =====

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(staged) = self.cache.get(key) {
            return Ok(staged);
        }
        Ok(self.kv.get(key)?)
    }

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        if let Some(present) = self.cache.has(key) {
            return Ok(present);
        }
        Ok(self.kv.has(key)?)
    }

    fn get_height_value(&self, key: &[u8]) -> Result<Option<u64>, StorageError> {
        match self.get(key)? {
            Some(bytes) => Ok(keys::decode_height(&bytes)),
            None => Ok(None),
        }
    }

    // ===== Point queries =====

    /// Last height durably present in the KV index (or staged above it).
    pub fn get_last_savepoint(&self) -> Result<Option<u64>, StorageError> {
        self.get_height_value(keys::LAST_HEIGHT_KEY)
    }

    pub fn get_last_config_block_height(&self) -> Result<Option<u64>, StorageError> {
        self.get_height_value(keys::LAST_CONFIG_HEIGHT_KEY)
    }

    pub fn get_block_index(&self, height: u64) -> Result<Option<StoreInfo>, StorageError> {
        match self.get(&keys::block_index_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_meta_index(&self, height: u64) -> Result<Option<StoreInfo>, StorageError> {
        match self.get(&keys::block_meta_index_key(height))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_height_by_hash(&self, hash: &Hash) -> Result<Option<u64>, StorageError> {
        self.get_height_value(&keys::block_hash_key(hash))
    }

    pub fn block_exists(&self, hash: &Hash) -> Result<bool, StorageError> {
        self.has(&keys::block_hash_key(hash))
    }

    pub fn get_tx_location(&self, tx_id: &str) -> Result<Option<TxLocation>, StorageError> {
        match self.get(&keys::tx_info_key(tx_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn tx_exists(&self, tx_id: &str) -> Result<bool, StorageError> {
        self.has(&keys::tx_info_key(tx_id))
    }

    pub fn get_tx_height(&self, tx_id: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.get_tx_location(tx_id)?.map(|loc| loc.block_height))
    }

    pub fn get_tx_confirmed_time(&self, tx_id: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.get_tx_location(tx_id)?.map(|loc| loc.block_timestamp))
    }

    pub fn get_rwset_index(&self, tx_id: &str) -> Result<Option<StoreInfo>, StorageError> {
        match self.get(&keys::rwset_index_key(tx_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ===== Compression-aware reads =====

    /// Resolve a location to readable bytes, decompressing its segment
    /// first when needed.
    fn read_section(&self, location: &StoreInfo) -> Result<Vec<u8>, StorageError> {
        let decompressed = self.find_or_decompress_store_info(location)?;
        self.binlog.read_file_section(decompressed, location)
    }

    pub fn get_block(&self, height: u64) -> Result<Option<BlockWithRwSet>, StorageError> {
        let Some(location) = self.get_block_index(height)? else {
            return Ok(None);
        };
        let payload = self.read_section(&location)?;
        Ok(Some(deserialize_block(&payload)?))
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockWithRwSet>, StorageError> {
        match self.get_height_by_hash(hash)? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    pub fn get_block_meta(&self, height: u64) -> Result<Option<SerializedMeta>, StorageError> {
        let Some(location) = self.get_block_meta_index(height)? else {
            return Ok(None);
        };
        let bytes = self.read_section(&location)?;
        Ok(Some(deserialize_meta(&bytes)?))
    }

    pub fn get_header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, StorageError> {
        Ok(self.get_block_meta(height)?.map(|meta| meta.header))
    }

    pub fn get_tx(&self, tx_id: &str) -> Result<Option<Transaction>, StorageError> {
        let Some(tx_location) = self.get_tx_location(tx_id)? else {
            return Ok(None);
        };
        let bytes = self.read_section(&tx_location.store_info)?;
        Ok(Some(decode(&bytes)?))
    }

    pub fn get_rwset(&self, tx_id: &str) -> Result<Option<TxRwSet>, StorageError> {
        let Some(location) = self.get_rwset_index(tx_id)? else {
            return Ok(None);
        };
        let bytes = self.read_section(&location)?;
        Ok(Some(decode(&bytes)?))
    }

    pub fn get_last_block(&self) -> Result<Option<BlockWithRwSet>, StorageError> {
        match self.get_last_savepoint()? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    pub fn get_last_config_block(&self) -> Result<Option<BlockWithRwSet>, StorageError> {
        match self.get_last_config_block_height()? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    // ===== Compression lifecycle =====

    /// Persisted compressed-height marker; `None` when nothing has been
    /// compressed yet.
    pub fn get_compressed_height(&self) -> Result<Option<u64>, StorageError> {
        match self.kv.get(keys::COMPRESSED_HEIGHT_KEY)? {
            Some(bytes) => Ok(keys::decode_height(&bytes)),
            None => Ok(None),
        }
    }

    fn save_compressed_height(&self, height: u64) -> Result<(), StorageError> {
        Ok(self
            .kv
            .put(keys::COMPRESSED_HEIGHT_KEY, &keys::encode_height(height))?)
    }

    /// End height of the segment beginning at `begin_height`, from the
    /// persisted segment map.
    pub fn get_segment_end(&self, begin_height: u64) -> Result<Option<u64>, StorageError> {
        match self.kv.get(&keys::segment_map_key(begin_height))? {
            Some(bytes) => Ok(keys::decode_height(&bytes)),
            None => Ok(None),
        }
    }

    /// Whether the segment owning `location` is compressed; if so, make
    /// sure a decompressed copy exists and tell the caller to read it.
    pub fn find_or_decompress_store_info(
        &self,
        location: &StoreInfo,
    ) -> Result<bool, StorageError> {
        let Some(marker) = self.get_compressed_height()? else {
            return Ok(false);
        };
        let first_index = location
            .segment_first_index()
            .ok_or_else(|| StorageError::InvalidIndex(location.to_string()))?;
        // Segment files are named for height + 1.
        let seg_first_height = first_index - 1;
        if seg_first_height > marker {
            return Ok(false);
        }

        let _guard = self.decompress_lock.lock();
        let (exists, _) = self.binlog.check_decompress_file_exist(&location.file_name)?;
        if !exists {
            self.binlog.decompress_file(&location.file_name)?;
            let marker = FileMarker {
                file_name: location.file_name.clone(),
                created_at: now_unix(),
            };
            let bytes = serde_json::to_vec(&marker)
                .map_err(|e| StorageError::Compression(e.to_string()))?;
            if let Err(e) = self
                .kv
                .put(&keys::decompressed_file_key(&location.file_name), &bytes)
            {
                warn!(
                    "[archive] chain {} failed to persist decompress marker for {}: {e}",
                    self.chain_id, location.file_name
                );
            }
        }
        Ok(true)
    }

    /// Compress every whole segment from the current marker up to (but
    /// never past) `height`, persisting the advanced marker after each
    /// segment so a crash mid-walk resumes exactly where it stopped.
    ///
    /// Returns the `(start, end)` height range actually compressed, or
    /// `None` when no segment was eligible.
    pub fn compress_under_height(&self, height: u64) -> Result<Option<(u64, u64)>, StorageError> {
        let marker = self.get_compressed_height()?;
        if let Some(m) = marker {
            if height <= m {
                return Err(StorageError::AlreadyCompressed(m));
            }
        }
        let bound = self.binlog.can_compress_height();
        let start = marker.map(|m| m + 1).unwrap_or(0);
        info!(
            "[archive] chain {} compress walk: requested {height}, bound {bound}, start {start}",
            self.chain_id
        );

        let mut current = start;
        let mut last_end = None;
        loop {
            let Some(end) = self.get_segment_end(current)? else {
                break;
            };
            // Whole segments only, strictly below the bound, never past
            // the requested height.
            if end >= bound || end > height {
                break;
            }
            let name = self.binlog.compress_file_by_start_height(current)?;
            self.save_compressed_height(end)?;
            let marker = FileMarker {
                file_name: name.clone(),
                created_at: now_unix(),
            };
            let bytes = serde_json::to_vec(&marker)
                .map_err(|e| StorageError::Compression(e.to_string()))?;
            if let Err(e) = self.kv.put(&keys::compressed_file_key(&name), &bytes) {
                warn!(
                    "[archive] chain {} failed to persist compress marker for {name}: {e}",
                    self.chain_id
                );
            }
            info!(
                "[archive] chain {} compressed segment {name}: heights {current}..={end}",
                self.chain_id
            );
            last_end = Some(end);
            current = end + 1;
        }
        Ok(last_end.map(|end| (start, end)))
    }

    /// One reap pass: delete files whose marker has aged past
    /// `retain_seconds` and whose on-disk copy is no longer inside the
    /// log's own retention window, then drop the marker.
    pub fn reap_files(
        &self,
        is_decompressed: bool,
        retain_seconds: i64,
    ) -> Result<(), StorageError> {
        let prefix = if is_decompressed {
            keys::DECOMPRESSED_FILE_PREFIX
        } else {
            keys::COMPRESSED_FILE_PREFIX
        };
        let now = now_unix();
        for (key, value) in self.kv.prefix_scan(prefix)? {
            let marker: FileMarker = match serde_json::from_slice(&value) {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        "[archive] chain {} skipping unreadable reap marker: {e}",
                        self.chain_id
                    );
                    continue;
                }
            };
            if now - marker.created_at < retain_seconds {
                continue;
            }
            let removed = match self
                .binlog
                .try_remove_file(&marker.file_name, is_decompressed)
            {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(
                        "[archive] chain {} failed to remove {}: {e}",
                        self.chain_id, marker.file_name
                    );
                    continue;
                }
            };
            if removed {
                self.kv.delete(&key)?;
                info!(
                    "[archive] chain {} reaped {} copy of {}",
                    self.chain_id,
                    if is_decompressed { "decompressed" } else { "plaintext" },
                    marker.file_name
                );
            }
        }
        Ok(())
    }

    pub fn close(&self) -> Result<(), StorageError> {
        self.cache.clear();
        self.kv.close()?;
        Ok(())
    }
}
