//! # Archive Domain Types
//!
//! Shared entities for the chain-archive workspace: blocks, headers,
//! transactions, read/write sets, chain configuration, the `StoreInfo`
//! location handle, block hashing, and the block payload wire format.
//!
//! Every other crate in the workspace speaks these types; none of them
//! carry behavior beyond hashing and (de)serialization.

pub mod entities;
pub mod errors;
pub mod hashing;
pub mod serialization;
pub mod store_info;
pub mod testing;

pub use entities::{
    ArchiveStatus, Block, BlockHeader, BlockWithRwSet, ChainConfig, Hash, Transaction, TxPayload,
    TxRead, TxRwSet, TxWrite,
};
pub use errors::TypesError;
pub use hashing::{compute_block_hash, verify_block_hash};
pub use serialization::{
    deserialize_block, deserialize_meta, serialize_block, SectionSpan, SerializedBlockParts,
    SerializedMeta,
};
pub use store_info::StoreInfo;
