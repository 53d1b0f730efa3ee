//! Typed query surface of one chain processor.
//!
//! Thin delegation to the index store, plus the few queries that need
//! processor state (frontier, in-archive flag, config history).

use crate::error::ProcessError;
use crate::processor::ChainProcessor;
use archive_storage::TxLocation;
use archive_types::{
    Block, BlockHeader, BlockWithRwSet, ChainConfig, Hash, SerializedMeta, Transaction, TxRwSet,
};

impl ChainProcessor {
    /// Chain config in force right now.
    pub fn current_config(&self) -> ChainConfig {
        self.current_config.read().clone()
    }

    /// Chain config in force at `height`: the config carried by the
    /// nearest config block at or below it. `None` when the height is not
    /// archived yet.
    pub fn chain_config_at(&self, height: u64) -> Result<Option<ChainConfig>, ProcessError> {
        if height > self.archived_height() {
            return Ok(None);
        }
        // Config blocks are rare; walk back to the nearest one. Genesis
        // is a config block, so the walk terminates.
        let mut cursor = height;
        loop {
            let block = self
                .store()
                .get_block(cursor)?
                .ok_or(ProcessError::ChainStateMissing("archived block"))?;
            if let Some(config) = block.block.chain_config() {
                return Ok(Some(config.clone()));
            }
            if cursor == 0 {
                return Ok(None);
            }
            cursor -= 1;
        }
    }

    /// `(archived height, in-archive flag)`.
    pub fn archive_status(&self) -> (u64, bool) {
        (self.archived_height(), self.in_archive())
    }

    pub fn get_block(&self, height: u64) -> Result<Option<Block>, ProcessError> {
        Ok(self
            .store()
            .get_block(height)?
            .map(|bundle| bundle.block))
    }

    pub fn get_block_with_rwset(
        &self,
        height: u64,
    ) -> Result<Option<BlockWithRwSet>, ProcessError> {
        Ok(self.store().get_block(height)?)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ProcessError> {
        Ok(self
            .store()
            .get_block_by_hash(hash)?
            .map(|bundle| bundle.block))
    }

    pub fn get_height_by_hash(&self, hash: &Hash) -> Result<Option<u64>, ProcessError> {
        Ok(self.store().get_height_by_hash(hash)?)
    }

    pub fn block_exists(&self, hash: &Hash) -> Result<bool, ProcessError> {
        Ok(self.store().block_exists(hash)?)
    }

    pub fn get_block_meta(&self, height: u64) -> Result<Option<SerializedMeta>, ProcessError> {
        Ok(self.store().get_block_meta(height)?)
    }

    pub fn get_header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, ProcessError> {
        Ok(self.store().get_header_by_height(height)?)
    }

    pub fn get_tx(&self, tx_id: &str) -> Result<Option<Transaction>, ProcessError> {
        Ok(self.store().get_tx(tx_id)?)
    }

    /// Transaction location record: block height/hash, index in block,
    /// confirmation time, byte span.
    pub fn get_tx_location(&self, tx_id: &str) -> Result<Option<TxLocation>, ProcessError> {
        Ok(self.store().get_tx_location(tx_id)?)
    }

    pub fn tx_exists(&self, tx_id: &str) -> Result<bool, ProcessError> {
        Ok(self.store().tx_exists(tx_id)?)
    }

    pub fn get_tx_height(&self, tx_id: &str) -> Result<Option<u64>, ProcessError> {
        Ok(self.store().get_tx_height(tx_id)?)
    }

    pub fn get_tx_confirmed_time(&self, tx_id: &str) -> Result<Option<i64>, ProcessError> {
        Ok(self.store().get_tx_confirmed_time(tx_id)?)
    }

    pub fn get_rwset(&self, tx_id: &str) -> Result<Option<TxRwSet>, ProcessError> {
        Ok(self.store().get_rwset(tx_id)?)
    }

    pub fn get_block_by_tx(&self, tx_id: &str) -> Result<Option<Block>, ProcessError> {
        match self.store().get_tx_height(tx_id)? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    pub fn get_last_block(&self) -> Result<Option<BlockWithRwSet>, ProcessError> {
        Ok(self.store().get_last_block()?)
    }

    pub fn get_last_savepoint(&self) -> Result<Option<u64>, ProcessError> {
        Ok(self.store().get_last_savepoint()?)
    }

    pub fn get_last_config_block(&self) -> Result<Option<BlockWithRwSet>, ProcessError> {
        Ok(self.store().get_last_config_block()?)
    }

    pub fn get_last_config_block_height(&self) -> Result<Option<u64>, ProcessError> {
        Ok(self.store().get_last_config_block_height()?)
    }

    /// Blocks in `[start, end]`, clamped to the archived frontier. The
    /// span is bounded by the configured maximum.
    pub fn get_range_blocks(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<BlockWithRwSet>, ProcessError> {
        let archived = self.archived_height();
        if end < start || start > archived {
            return Ok(Vec::new());
        }
        let end = end.min(archived);
        let span = end - start + 1;
        if span > self.max_query_range {
            return Err(ProcessError::QueryRangeTooLarge {
                span,
                max: self.max_query_range,
            });
        }
        let mut blocks = Vec::with_capacity(span as usize);
        for height in start..=end {
            match self.store().get_block(height)? {
                Some(bundle) => blocks.push(bundle),
                None => break,
            }
        }
        Ok(blocks)
    }
}
