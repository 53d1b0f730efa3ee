//! Crash recovery: reconcile the block log against the index savepoint.
//!
//! The log write lands before the index flush, so a crash between the two
//! leaves entries in the active segment that the KV index never saw.
//! Recovery replays exactly those entries through the normal two-phase
//! commit. Replay is idempotent: rewriting index entries for blocks the
//! KV already holds produces identical values.

use crate::error::ProcessError;
use crate::processor::ChainProcessor;
use archive_storage::{IndexedBlock, SegmentBoundary, StorageError};
use archive_types::{deserialize_block, serialize_block};
use tracing::{debug, info};

impl ChainProcessor {
    /// Replay log entries past the index savepoint. No-op when the two
    /// already agree.
    pub(crate) fn recover(&self) -> Result<(), ProcessError> {
        let last_index = self.store().binlog().last_index()?;
        if last_index < 1 {
            return Ok(());
        }
        // Logical index of the last block the KV index knows about.
        let db_index = match self.store().get_last_savepoint()? {
            Some(height) => height + 1,
            None => 0,
        };
        if db_index >= last_index {
            return Ok(());
        }
        info!(
            "[archive] chain {} recovering: log at index {last_index}, index at {db_index}",
            self.chain_id()
        );

        for index in (db_index + 1)..=last_index {
            let (payload, location) = self.store().binlog().read_last_seg_section(index)?;
            let bundle = deserialize_block(&payload)?;
            let parts = serialize_block(&bundle)?;
            let height = index - 1;

            // The boundary record of a write that sealed a segment was
            // staged, not flushed; rebuild it from the file names. An
            // entry that opens its segment sealed the previous one.
            let mut boundary = SegmentBoundary::default();
            let first_index = location
                .segment_first_index()
                .ok_or_else(|| StorageError::InvalidIndex(location.to_string()))?;
            if first_index == index && index > 1 {
                let prev = self
                    .store()
                    .get_block_index(height - 1)?
                    .ok_or(ProcessError::ChainStateMissing("predecessor block index"))?;
                let prev_first = prev
                    .segment_first_index()
                    .ok_or_else(|| StorageError::InvalidIndex(prev.to_string()))?;
                boundary = SegmentBoundary {
                    begin_height: prev_first - 1,
                    end_height: height - 1,
                    need_record: true,
                };
            }

            let indexed = IndexedBlock::new(bundle, &parts, location, boundary);
            self.write_db(&indexed)?;
            debug!(
                "[archive] chain {} replayed block at height {height}",
                self.chain_id()
            );
        }
        Ok(())
    }
}
