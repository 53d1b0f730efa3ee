//! KV keyspace of the block index.
//!
//! Heights inside keys are big-endian u64 so prefix scans come back in
//! height order.

use archive_types::Hash;

pub const BLOCK_INDEX_PREFIX: &[u8] = b"ib";
pub const BLOCK_META_INDEX_PREFIX: &[u8] = b"im";
pub const BLOCK_HASH_PREFIX: &[u8] = b"h";
pub const TX_INFO_PREFIX: &[u8] = b"b";
pub const RWSET_INDEX_PREFIX: &[u8] = b"ri";
pub const SEGMENT_MAP_PREFIX: &[u8] = b"sem";
pub const LAST_HEIGHT_KEY: &[u8] = b"lastBlockNumKey";
pub const LAST_CONFIG_HEIGHT_KEY: &[u8] = b"lastConfigBlockNumKey";
pub const COMPRESSED_HEIGHT_KEY: &[u8] = b"compressedHeightKey";
/// Marker prefix for compressed segment originals awaiting reaping.
pub const COMPRESSED_FILE_PREFIX: &[u8] = b"cf";
/// Marker prefix for decompressed copies awaiting reaping.
pub const DECOMPRESSED_FILE_PREFIX: &[u8] = b"df";

pub fn encode_height(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub fn decode_height(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

fn prefixed(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(rest);
    key
}

pub fn block_index_key(height: u64) -> Vec<u8> {
    prefixed(BLOCK_INDEX_PREFIX, &encode_height(height))
}

pub fn block_meta_index_key(height: u64) -> Vec<u8> {
    prefixed(BLOCK_META_INDEX_PREFIX, &encode_height(height))
}

pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
    prefixed(BLOCK_HASH_PREFIX, hash)
}

pub fn tx_info_key(tx_id: &str) -> Vec<u8> {
    prefixed(TX_INFO_PREFIX, tx_id.as_bytes())
}

pub fn rwset_index_key(tx_id: &str) -> Vec<u8> {
    prefixed(RWSET_INDEX_PREFIX, tx_id.as_bytes())
}

pub fn segment_map_key(begin_height: u64) -> Vec<u8> {
    prefixed(SEGMENT_MAP_PREFIX, &encode_height(begin_height))
}

pub fn compressed_file_key(file_name: &str) -> Vec<u8> {
    prefixed(COMPRESSED_FILE_PREFIX, file_name.as_bytes())
}

pub fn decompressed_file_key(file_name: &str) -> Vec<u8> {
    prefixed(DECOMPRESSED_FILE_PREFIX, file_name.as_bytes())
}
