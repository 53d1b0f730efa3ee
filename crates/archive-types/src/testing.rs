//! Shared test fixtures for building well-formed chains of blocks.
//!
//! Every builder produces blocks whose recorded hash verifies, so tests
//! exercising hash checks and parent linkage can use them directly.

use crate::entities::{
    Block, BlockHeader, BlockWithRwSet, ChainConfig, Hash, Transaction, TxPayload, TxRead, TxRwSet,
    TxWrite,
};
use crate::hashing::compute_block_hash;

/// Chain id used by all fixtures.
pub const TEST_CHAIN_ID: &str = "chain-test";

fn finish_block(mut block: Block, rwsets: Vec<TxRwSet>) -> BlockWithRwSet {
    block.header.block_hash = compute_block_hash(&block).unwrap();
    BlockWithRwSet { block, rwsets }
}

fn invoke_tx(height: u64, n: usize) -> Transaction {
    Transaction {
        tx_id: format!("tx-{height}-{n}"),
        timestamp: 1_700_000_000 + height as i64,
        payload: TxPayload::Invoke {
            contract: "asset".to_string(),
            method: "transfer".to_string(),
            args: vec![vec![n as u8], height.to_le_bytes().to_vec()],
        },
    }
}

fn rwset_for(tx: &Transaction) -> TxRwSet {
    TxRwSet {
        tx_id: tx.tx_id.clone(),
        reads: vec![TxRead {
            contract: "asset".to_string(),
            key: b"balance/a".to_vec(),
            version: Some(1),
        }],
        writes: vec![TxWrite {
            contract: "asset".to_string(),
            key: b"balance/b".to_vec(),
            value: tx.tx_id.as_bytes().to_vec(),
        }],
    }
}

/// Build a block at `height` with `n_txs` invoke transactions and one rwset
/// per transaction. The recorded block hash is valid.
pub fn build_block_with_rwset(height: u64, pre_block_hash: Hash, n_txs: usize) -> BlockWithRwSet {
    let txs: Vec<Transaction> = (0..n_txs).map(|n| invoke_tx(height, n)).collect();
    let rwsets = txs.iter().map(rwset_for).collect();
    let block = Block {
        header: BlockHeader {
            chain_id: TEST_CHAIN_ID.to_string(),
            version: 1,
            block_height: height,
            pre_block_hash,
            block_hash: [0u8; 32],
            tx_root: [height as u8; 32],
            block_timestamp: 1_700_000_000 + height as i64,
            proposer: b"node-0".to_vec(),
        },
        txs,
    };
    finish_block(block, rwsets)
}

/// Build a config block at `height` carrying `config`. Its first (only)
/// transaction is the configuration update.
pub fn build_config_block(height: u64, pre_block_hash: Hash, config: ChainConfig) -> BlockWithRwSet {
    let tx = Transaction {
        tx_id: format!("tx-cfg-{height}"),
        timestamp: 1_700_000_000 + height as i64,
        payload: TxPayload::ConfigUpdate(config),
    };
    let rwsets = vec![TxRwSet {
        tx_id: tx.tx_id.clone(),
        reads: vec![],
        writes: vec![],
    }];
    let block = Block {
        header: BlockHeader {
            chain_id: TEST_CHAIN_ID.to_string(),
            version: 1,
            block_height: height,
            pre_block_hash,
            block_hash: [0u8; 32],
            tx_root: [height as u8; 32],
            block_timestamp: 1_700_000_000 + height as i64,
            proposer: b"node-0".to_vec(),
        },
        txs: vec![tx],
    };
    finish_block(block, rwsets)
}

/// Build the genesis config block (height 0, zero parent hash).
pub fn build_genesis_block() -> BlockWithRwSet {
    let config = ChainConfig {
        chain_id: TEST_CHAIN_ID.to_string(),
        version: 1,
        ..ChainConfig::default()
    };
    build_config_block(0, [0u8; 32], config)
}

/// Build a correctly linked chain of `len` blocks starting at genesis:
/// block 0 is the genesis config block, blocks 1.. are invoke blocks whose
/// `pre_block_hash` points at the previous block.
pub fn build_chain(len: usize) -> Vec<BlockWithRwSet> {
    let mut chain = Vec::with_capacity(len);
    if len == 0 {
        return chain;
    }
    chain.push(build_genesis_block());
    for height in 1..len as u64 {
        let parent = chain[height as usize - 1].block.header.block_hash;
        chain.push(build_block_with_rwset(height, parent, 2));
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::verify_block_hash;

    #[test]
    fn test_chain_links_and_verifies() {
        let chain = build_chain(4);
        assert_eq!(chain.len(), 4);
        assert!(chain[0].block.is_config_block());
        for (i, bundle) in chain.iter().enumerate() {
            assert_eq!(bundle.block.header.block_height, i as u64);
            assert!(verify_block_hash(&bundle.block).unwrap());
            if i > 0 {
                assert_eq!(
                    bundle.block.header.pre_block_hash,
                    chain[i - 1].block.header.block_hash
                );
            }
        }
    }
}
