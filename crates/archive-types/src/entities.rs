//! # Core Archive Entities
//!
//! The block/transaction/rwset model archived off the live chain, plus the
//! chain configuration carried inside config blocks.

use serde::{Deserialize, Serialize};

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// The header of an archived block.
///
/// `block_hash` is the hash of this header with the `block_hash` field
/// itself zeroed; see [`crate::hashing::compute_block_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Chain this block belongs to.
    pub chain_id: String,
    /// Protocol version for this block.
    pub version: u32,
    /// Block height in the chain.
    pub block_height: u64,
    /// Hash of the parent block (creates the chain linkage).
    pub pre_block_hash: Hash,
    /// Hash of this block.
    pub block_hash: Hash,
    /// Merkle root of all transactions in the block.
    pub tx_root: Hash,
    /// Unix timestamp (seconds) when the block was proposed.
    pub block_timestamp: i64,
    /// Identity of the proposer.
    pub proposer: Vec<u8>,
}

/// Payload of an archived transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// A contract invocation.
    Invoke {
        contract: String,
        method: String,
        args: Vec<Vec<u8>>,
    },
    /// A chain configuration update. A block whose first transaction
    /// carries this payload is a config block.
    ConfigUpdate(ChainConfig),
}

/// A finalized transaction as archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub tx_id: String,
    /// Submission timestamp (seconds).
    pub timestamp: i64,
    /// What the transaction did.
    pub payload: TxPayload,
}

/// Chain configuration in force from the block that carried it onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier.
    pub chain_id: String,
    /// Monotonic configuration version.
    pub version: u64,
    /// Hash algorithm name used by the chain (informational; the archive
    /// always verifies with SHA-256).
    pub crypto_hash: String,
    /// Target block interval in milliseconds.
    pub block_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            version: 0,
            crypto_hash: "SHA256".to_string(),
            block_interval_ms: 2000,
        }
    }
}

/// One read performed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRead {
    pub contract: String,
    pub key: Vec<u8>,
    /// Version of the value observed, if any existed.
    pub version: Option<u64>,
}

/// One write performed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxWrite {
    pub contract: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// The read/write set produced by one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRwSet {
    pub tx_id: String,
    pub reads: Vec<TxRead>,
    pub writes: Vec<TxWrite>,
}

/// A finalized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// A config block updates the chain configuration via its first
    /// transaction. Genesis blocks are always config blocks.
    pub fn is_config_block(&self) -> bool {
        matches!(
            self.txs.first().map(|tx| &tx.payload),
            Some(TxPayload::ConfigUpdate(_))
        )
    }

    /// The configuration carried by this block, if it is a config block.
    pub fn chain_config(&self) -> Option<&ChainConfig> {
        match self.txs.first().map(|tx| &tx.payload) {
            Some(TxPayload::ConfigUpdate(cfg)) => Some(cfg),
            _ => None,
        }
    }

    /// Block hash rendered as lowercase hex, the registry key format.
    pub fn block_hash_str(&self) -> String {
        hex::encode(self.header.block_hash)
    }
}

/// A block bundled with the read/write sets of its transactions. This is
/// the unit the live chain streams to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockWithRwSet {
    pub block: Block,
    pub rwsets: Vec<TxRwSet>,
}

/// Outcome of archiving one block.
///
/// Failures travel on the error channel; these are the two success shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// The block was appended and indexed.
    Archived,
    /// An identical block at this height was archived earlier; the call
    /// was an idempotent re-delivery.
    AlreadyArchived,
}
