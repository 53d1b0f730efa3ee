//! # Chain Processor
//!
//! One per registered chain. Owns the archive frontier (`archived_height`),
//! the chain config currently in force, the compression gate, and the
//! background reap threads. All block writes funnel through
//! [`ChainProcessor::append_block`]: serialize, append to the block log,
//! then two-phase commit the index batch.

use crate::config::StorageConfig;
use crate::error::ProcessError;
use crate::latch::ServerLatch;
use archive_storage::{BlockIndexStore, IndexedBlock};
use archive_types::{serialize_block, BlockWithRwSet, ChainConfig};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ChainProcessor {
    chain_id: String,
    genesis_hash: String,
    store: Arc<BlockIndexStore>,
    latch: ServerLatch,
    archived_height: AtomicU64,
    pub(crate) in_archive: AtomicBool,
    pub(crate) in_compress: AtomicBool,
    pub(crate) current_config: RwLock<ChainConfig>,
    pub(crate) max_query_range: u64,
    shutdown: Arc<AtomicBool>,
    reapers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChainProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProcessor")
            .field("chain_id", &self.chain_id)
            .field("genesis_hash", &self.genesis_hash)
            .finish_non_exhaustive()
    }
}

impl ChainProcessor {
    /// Build the processor over an already-opened index store.
    ///
    /// `is_first` distinguishes a fresh registration (append the genesis
    /// block) from a reload (restore the frontier and current config from
    /// the index). Recovery runs first in both cases.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        genesis_hash: impl Into<String>,
        chain_id: impl Into<String>,
        genesis_config: ChainConfig,
        genesis_block: &BlockWithRwSet,
        is_first: bool,
        store: Arc<BlockIndexStore>,
        config: &StorageConfig,
        latch: ServerLatch,
    ) -> Result<Self, ProcessError> {
        let processor = Self {
            chain_id: chain_id.into(),
            genesis_hash: genesis_hash.into(),
            store,
            latch,
            archived_height: AtomicU64::new(0),
            in_archive: AtomicBool::new(false),
            in_compress: AtomicBool::new(false),
            current_config: RwLock::new(genesis_config),
            max_query_range: config.max_query_range,
            shutdown: Arc::new(AtomicBool::new(false)),
            reapers: Mutex::new(Vec::new()),
        };
        processor.recover()?;

        if is_first {
            processor.append_block(genesis_block)?;
            info!(
                "[archive] chain {} initialized with genesis block",
                processor.chain_id
            );
        } else {
            let savepoint = processor
                .store
                .get_last_savepoint()?
                .ok_or(ProcessError::ChainStateMissing("index savepoint"))?;
            let config_block = processor
                .store
                .get_last_config_block()?
                .ok_or(ProcessError::ChainStateMissing("last config block"))?;
            let current = config_block
                .block
                .chain_config()
                .cloned()
                .ok_or(ProcessError::ChainStateMissing("config payload"))?;
            processor.archived_height.store(savepoint, Ordering::SeqCst);
            *processor.current_config.write() = current;
            info!(
                "[archive] chain {} reloaded at archived height {savepoint}",
                processor.chain_id
            );
        }

        processor.spawn_reaper(false, config);
        processor.spawn_reaper(true, config);
        Ok(processor)
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    pub fn store(&self) -> &Arc<BlockIndexStore> {
        &self.store
    }

    pub(crate) fn latch(&self) -> &ServerLatch {
        &self.latch
    }

    pub fn archived_height(&self) -> u64 {
        self.archived_height.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_archived_height(&self, height: u64) {
        self.archived_height.store(height, Ordering::SeqCst);
    }

    /// Serialize, append to the block log, and two-phase commit the index
    /// batch for one block.
    pub(crate) fn append_block(&self, bundle: &BlockWithRwSet) -> Result<(), ProcessError> {
        let parts = serialize_block(bundle)?;
        let height = bundle.block.header.block_height;
        let (location, boundary) = self.store.binlog().write(height + 1, &parts.bytes)?;
        let indexed = IndexedBlock::new(bundle.clone(), &parts, location, boundary);
        self.write_db(&indexed)
    }

    /// Stage then flush the index batch for one appended block.
    pub(crate) fn write_db(&self, indexed: &IndexedBlock) -> Result<(), ProcessError> {
        self.store.commit_block(indexed, true)?;
        self.store.commit_block(indexed, false)?;
        Ok(())
    }

    /// Background thread reaping one file class (compressed originals or
    /// decompressed copies) every `scan_interval_seconds`.
    fn spawn_reaper(&self, is_decompressed: bool, config: &StorageConfig) {
        let store = Arc::clone(&self.store);
        let latch = self.latch.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_secs(config.scan_interval_seconds.max(1));
        let retain = config.retain_seconds;
        let chain = self.chain_id.clone();
        let kind = if is_decompressed {
            "decompress"
        } else {
            "compress"
        };

        let spawned = thread::Builder::new()
            .name(format!("reap-{kind}-{chain}"))
            .spawn(move || {
                // Sleep in short steps so close() is not held up by the
                // scan interval.
                let step = Duration::from_millis(200);
                loop {
                    let mut waited = Duration::ZERO;
                    while waited < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(step);
                        waited += step;
                    }
                    let _guard = latch.guard();
                    if let Err(e) = store.reap_files(is_decompressed, retain) {
                        warn!("[archive] chain {chain} {kind} reap pass failed: {e}");
                    }
                }
            });
        match spawned {
            Ok(handle) => self.reapers.lock().push(handle),
            Err(e) => warn!(
                "[archive] chain {} failed to spawn {kind} reaper: {e}",
                self.chain_id
            ),
        }
    }

    /// Stop the reapers, then close the index store and the block log.
    pub fn close(&self) -> Result<(), ProcessError> {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.reapers.lock().drain(..) {
            if handle.join().is_err() {
                warn!("[archive] chain {} reaper thread panicked", self.chain_id);
            }
        }
        self.store.close()?;
        self.store.binlog().close()?;
        debug!("[archive] chain {} processor closed", self.chain_id);
        Ok(())
    }
}
