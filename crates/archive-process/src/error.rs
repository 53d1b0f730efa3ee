//! Errors raised by the process layer.

use archive_kv::KvError;
use archive_storage::StorageError;
use archive_types::TypesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The delivered block skips ahead of the archive frontier.
    #[error("archived height {archived} and block height {got} mismatched")]
    HeightMismatch { archived: u64, got: u64 },

    /// A re-delivered block disagrees with the block archived at its
    /// height.
    #[error("block at height {0} does not match the archived block")]
    ArchivedMismatch(u64),

    /// The block's recorded hash does not match its recomputed hash.
    #[error("block hash verification failed at height {0}")]
    BlockHashVerifyFailed(u64),

    /// The block's parent hash does not match the last archived block.
    #[error("block at height {0} does not link to the last archived block")]
    BrokenLinkage(u64),

    /// Another compression run is in flight on this chain.
    #[error("chain is already compressing")]
    InCompress,

    /// The genesis block's first transaction is not a config update.
    #[error("genesis block does not carry a chain config")]
    GenesisNotConfig,

    #[error("chain {0} is not registered")]
    ChainNotRegistered(String),

    /// Another caller is registering the same chain right now.
    #[error("chain {0} registration already in progress")]
    RegisterConflict(String),

    /// A registered chain's persisted state is incomplete.
    #[error("chain state missing: {0}")]
    ChainStateMissing(&'static str),

    /// A range query spans more blocks than the configured maximum.
    #[error("query range of {span} blocks exceeds the maximum of {max}")]
    QueryRangeTooLarge { span: u64, max: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Types(#[from] TypesError),
}
