//! # Archive Service
//!
//! The multi-chain front of the archive store. Chains are keyed by the
//! hex of their genesis block hash; registration persists the genesis
//! record into a system KV store so registered chains come back on
//! restart without re-registration. Each chain owns an engine triple
//! (segment log, KV index, processor) under its own directory.

use crate::config::StorageConfig;
use crate::error::ProcessError;
use crate::latch::ServerLatch;
use crate::processor::ChainProcessor;
use archive_kv::{BatchOperation, KvError, KvStore, MemKvStore};
use archive_storage::{BlockIndexStore, SegmentLog};
use archive_types::{verify_block_hash, BlockWithRwSet, ChainConfig, TypesError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

// System KV keyspace: genesis hash (hex) suffixed onto each prefix.
const GENESIS_CHAIN_ID_PREFIX: &[u8] = b"gChain";
const GENESIS_CONFIG_PREFIX: &[u8] = b"gConfig";
const GENESIS_BLOCK_PREFIX: &[u8] = b"gBlock";

/// Opens named KV stores. The service asks for one store per chain plus
/// one `"system"` store for registration records.
pub trait KvOpener: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn KvStore>, KvError>;
}

/// In-memory opener handing out one shared [`MemKvStore`] per name, so a
/// re-opened service sees the same data.
#[derive(Default)]
pub struct MemKvOpener {
    stores: Mutex<HashMap<String, Arc<MemKvStore>>>,
}

impl MemKvOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvOpener for MemKvOpener {
    fn open(&self, name: &str) -> Result<Arc<dyn KvStore>, KvError> {
        let store = self
            .stores
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemKvStore::new()))
            .clone();
        Ok(store)
    }
}

/// RocksDB opener rooting each store under `<base>/<name>`.
#[cfg(feature = "rocksdb")]
pub struct RocksKvOpener {
    base: std::path::PathBuf,
    sync_writes: bool,
}

#[cfg(feature = "rocksdb")]
impl RocksKvOpener {
    pub fn new(base: impl Into<std::path::PathBuf>, sync_writes: bool) -> Self {
        Self {
            base: base.into(),
            sync_writes,
        }
    }
}

#[cfg(feature = "rocksdb")]
impl KvOpener for RocksKvOpener {
    fn open(&self, name: &str) -> Result<Arc<dyn KvStore>, KvError> {
        let config = archive_kv::RocksDbConfig {
            path: self.base.join(name).to_string_lossy().into_owned(),
            sync_writes: self.sync_writes,
            ..archive_kv::RocksDbConfig::default()
        };
        Ok(Arc::new(archive_kv::RocksKvStore::open(config)?))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RegisterState {
    Registering,
    Registered,
}

/// Outcome of a successful [`ArchiveService::register_chain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    /// The chain was registered and its genesis block archived.
    Registered,
    /// The chain was registered earlier; nothing changed.
    AlreadyRegistered,
}

/// Snapshot of one registered chain for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    pub chain_id: String,
    pub genesis_hash: String,
    pub archived_height: u64,
    pub in_archive: bool,
}

pub struct ArchiveService {
    config: StorageConfig,
    opener: Arc<dyn KvOpener>,
    system_kv: Arc<dyn KvStore>,
    processors: RwLock<HashMap<String, Arc<ChainProcessor>>>,
    registry: Mutex<HashMap<String, RegisterState>>,
    latch: ServerLatch,
}

impl ArchiveService {
    /// Open the service and reload every chain registered in the system
    /// KV store.
    pub fn open(config: StorageConfig, opener: Arc<dyn KvOpener>) -> Result<Self, ProcessError> {
        let system_kv = opener.open("system")?;
        let service = Self {
            config,
            opener,
            system_kv,
            processors: RwLock::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            latch: ServerLatch::new(),
        };
        service.load_registered_chains()?;
        Ok(service)
    }

    fn load_registered_chains(&self) -> Result<(), ProcessError> {
        for (key, value) in self.system_kv.prefix_scan(GENESIS_CHAIN_ID_PREFIX)? {
            let genesis_hash = String::from_utf8(key[GENESIS_CHAIN_ID_PREFIX.len()..].to_vec())
                .map_err(|_| ProcessError::ChainStateMissing("genesis hash key"))?;
            if hex::decode(&genesis_hash).is_err() {
                error!("[archive] skipping registration with bad genesis hash {genesis_hash}");
                continue;
            }
            let chain_id = String::from_utf8(value)
                .map_err(|_| ProcessError::ChainStateMissing("chain id record"))?;

            let config_bytes = self
                .system_kv
                .get(&prefixed(GENESIS_CONFIG_PREFIX, &genesis_hash))?
                .ok_or(ProcessError::ChainStateMissing("genesis config record"))?;
            let genesis_config: ChainConfig =
                bincode::deserialize(&config_bytes).map_err(TypesError::from)?;
            let block_bytes = self
                .system_kv
                .get(&prefixed(GENESIS_BLOCK_PREFIX, &genesis_hash))?
                .ok_or(ProcessError::ChainStateMissing("genesis block record"))?;
            let genesis_block: BlockWithRwSet =
                bincode::deserialize(&block_bytes).map_err(TypesError::from)?;

            let processor = self.construct_processor(
                &genesis_hash,
                &chain_id,
                genesis_config,
                &genesis_block,
                false,
            )?;
            info!(
                "[archive] reloaded chain {chain_id} ({genesis_hash}) at height {}",
                processor.archived_height()
            );
            self.processors
                .write()
                .insert(genesis_hash.clone(), processor);
            self.registry
                .lock()
                .insert(genesis_hash, RegisterState::Registered);
        }
        Ok(())
    }

    /// Register a chain by its genesis block. Concurrent registration of
    /// the same chain is single-flight; a finished registration is
    /// acknowledged idempotently.
    pub fn register_chain(
        &self,
        genesis: &BlockWithRwSet,
    ) -> Result<RegisterStatus, ProcessError> {
        let block = &genesis.block;
        let genesis_config = block
            .chain_config()
            .cloned()
            .ok_or(ProcessError::GenesisNotConfig)?;
        if !verify_block_hash(block)? {
            return Err(ProcessError::BlockHashVerifyFailed(
                block.header.block_height,
            ));
        }
        let genesis_hash = block.block_hash_str();

        {
            let mut registry = self.registry.lock();
            match registry.get(&genesis_hash) {
                Some(RegisterState::Registering) => {
                    return Err(ProcessError::RegisterConflict(genesis_hash));
                }
                Some(RegisterState::Registered) => {
                    return Ok(RegisterStatus::AlreadyRegistered);
                }
                None => {
                    registry.insert(genesis_hash.clone(), RegisterState::Registering);
                }
            }
        }

        let result = self.do_register(&genesis_hash, &genesis_config, genesis);
        match result {
            Ok(()) => {
                self.registry
                    .lock()
                    .insert(genesis_hash.clone(), RegisterState::Registered);
                info!(
                    "[archive] registered chain {} ({genesis_hash})",
                    genesis_config.chain_id
                );
                Ok(RegisterStatus::Registered)
            }
            Err(e) => {
                self.registry.lock().remove(&genesis_hash);
                error!("[archive] registering chain {genesis_hash} failed: {e}");
                Err(e)
            }
        }
    }

    fn do_register(
        &self,
        genesis_hash: &str,
        genesis_config: &ChainConfig,
        genesis: &BlockWithRwSet,
    ) -> Result<(), ProcessError> {
        let config_bytes = bincode::serialize(genesis_config).map_err(TypesError::from)?;
        let block_bytes = bincode::serialize(genesis).map_err(TypesError::from)?;
        self.system_kv.write_batch(vec![
            BatchOperation::put(
                prefixed(GENESIS_CHAIN_ID_PREFIX, genesis_hash),
                genesis_config.chain_id.as_bytes(),
            ),
            BatchOperation::put(prefixed(GENESIS_CONFIG_PREFIX, genesis_hash), config_bytes),
            BatchOperation::put(prefixed(GENESIS_BLOCK_PREFIX, genesis_hash), block_bytes),
        ])?;

        let processor = self.construct_processor(
            genesis_hash,
            &genesis_config.chain_id,
            genesis_config.clone(),
            genesis,
            true,
        )?;
        self.processors
            .write()
            .insert(genesis_hash.to_string(), processor);
        Ok(())
    }

    /// Open the engine triple for one chain and build its processor.
    fn construct_processor(
        &self,
        genesis_hash: &str,
        chain_id: &str,
        genesis_config: ChainConfig,
        genesis_block: &BlockWithRwSet,
        is_first: bool,
    ) -> Result<Arc<ChainProcessor>, ProcessError> {
        let kv = self.opener.open(chain_id)?;
        let (log_dir, compress_dir, decompress_dir) = self.config.chain_dirs(chain_id);
        let binlog = SegmentLog::open(
            log_dir,
            compress_dir,
            decompress_dir,
            self.config.log_options(),
        )?;
        let store = Arc::new(BlockIndexStore::new(chain_id, kv, Arc::new(binlog)));
        let processor = ChainProcessor::new(
            genesis_hash,
            chain_id,
            genesis_config,
            genesis_block,
            is_first,
            store,
            &self.config,
            self.latch.clone(),
        )?;
        Ok(Arc::new(processor))
    }

    /// Processor for the chain registered under `genesis_hash` (hex).
    pub fn processor(&self, genesis_hash: &str) -> Result<Arc<ChainProcessor>, ProcessError> {
        self.processors
            .read()
            .get(genesis_hash)
            .cloned()
            .ok_or_else(|| ProcessError::ChainNotRegistered(genesis_hash.to_string()))
    }

    pub fn chain_statuses(&self) -> Vec<ChainStatus> {
        self.processors
            .read()
            .values()
            .map(|processor| {
                let (archived_height, in_archive) = processor.archive_status();
                ChainStatus {
                    chain_id: processor.chain_id().to_string(),
                    genesis_hash: processor.genesis_hash().to_string(),
                    archived_height,
                    in_archive,
                }
            })
            .collect()
    }

    /// Drain in-flight operations, then close every chain and the system
    /// store.
    pub fn close(&self) -> Result<(), ProcessError> {
        self.latch.wait();
        for (genesis_hash, processor) in self.processors.write().drain() {
            if let Err(e) = processor.close() {
                warn!("[archive] closing chain {genesis_hash} failed: {e}");
            } else {
                info!("[archive] chain {genesis_hash} has shut down");
            }
        }
        self.system_kv.close()?;
        Ok(())
    }
}

fn prefixed(prefix: &[u8], genesis_hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + genesis_hash.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(genesis_hash.as_bytes());
    key
}
