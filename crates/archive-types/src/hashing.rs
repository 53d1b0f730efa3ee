//! # Block Hashing
//!
//! SHA-256 over the canonical header encoding. The `block_hash` field is
//! zeroed before hashing so the hash commits to everything else in the
//! header (height, parent hash, tx root, timestamp, proposer).

use crate::entities::{Block, Hash};
use crate::errors::TypesError;
use sha2::{Digest, Sha256};

/// Compute the canonical hash of a block.
pub fn compute_block_hash(block: &Block) -> Result<Hash, TypesError> {
    let mut header = block.header.clone();
    header.block_hash = [0u8; 32];
    let encoded = bincode::serialize(&header)?;
    let digest = Sha256::digest(&encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Verify that a block's recorded hash matches its recomputed hash.
pub fn verify_block_hash(block: &Block) -> Result<bool, TypesError> {
    let computed = compute_block_hash(block)?;
    Ok(computed == block.header.block_hash)
}
