//! The archive protocol state machine.
//!
//! Blocks arrive strictly one height at a time. A delivery is exactly one
//! of: a gap (rejected), a re-delivery of an already archived height
//! (verified against the archived header, then acknowledged idempotently),
//! or the next block (hash-verified, linkage-checked, appended). The
//! archived frontier only advances after the append and both commit
//! phases succeed.

use crate::error::ProcessError;
use crate::processor::ChainProcessor;
use archive_types::{verify_block_hash, ArchiveStatus, BlockWithRwSet};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

impl ChainProcessor {
    pub fn archive_block(&self, bundle: &BlockWithRwSet) -> Result<ArchiveStatus, ProcessError> {
        let _guard = self.latch().guard();
        let height = bundle.block.header.block_height;
        let archived = self.archived_height();
        debug!(
            "[archive] chain {} delivery at height {height}, frontier {archived}",
            self.chain_id()
        );

        if height > archived + 1 {
            return Err(ProcessError::HeightMismatch {
                archived,
                got: height,
            });
        }

        if height <= archived {
            // Re-delivery: acknowledge only if it matches what we hold.
            let header = self
                .store()
                .get_header_by_height(height)?
                .ok_or(ProcessError::ChainStateMissing("archived header"))?;
            if header.block_hash != bundle.block.header.block_hash
                || header.pre_block_hash != bundle.block.header.pre_block_hash
            {
                return Err(ProcessError::ArchivedMismatch(height));
            }
            return Ok(ArchiveStatus::AlreadyArchived);
        }

        if !verify_block_hash(&bundle.block)? {
            return Err(ProcessError::BlockHashVerifyFailed(height));
        }
        if height > 0 {
            let last = self
                .store()
                .get_last_block()?
                .ok_or(ProcessError::ChainStateMissing("last archived block"))?;
            if last.block.header.block_hash != bundle.block.header.pre_block_hash {
                return Err(ProcessError::BrokenLinkage(height));
            }
        }

        let new_config = bundle.block.chain_config().cloned();
        self.append_block(bundle)?;
        if height > 0 {
            self.advance_archived_height(height);
        }
        if let Some(config) = new_config {
            info!(
                "[archive] chain {} config updated at height {height}, version {}",
                self.chain_id(),
                config.version
            );
            *self.current_config.write() = config;
        }
        Ok(ArchiveStatus::Archived)
    }

    /// The transport brackets a streaming session with these marks;
    /// status queries report them.
    pub fn mark_in_archive(&self) {
        self.in_archive.store(true, Ordering::SeqCst);
    }

    pub fn mark_not_in_archive(&self) {
        self.in_archive.store(false, Ordering::SeqCst);
    }

    pub fn in_archive(&self) -> bool {
        self.in_archive.load(Ordering::SeqCst)
    }

    /// Compress every eligible whole segment at or below `height`. Only
    /// one run may be in flight per chain.
    pub fn compress_under_height(&self, height: u64) -> Result<Option<(u64, u64)>, ProcessError> {
        let _guard = self.latch().guard();
        if self
            .in_compress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProcessError::InCompress);
        }
        let result = self.store().compress_under_height(height);
        self.in_compress.store(false, Ordering::SeqCst);
        Ok(result?)
    }

    pub fn check_in_compress(&self) -> bool {
        self.in_compress.load(Ordering::SeqCst)
    }

    /// `(compressed height marker, in-compress flag)`.
    pub fn compress_status(&self) -> Result<(Option<u64>, bool), ProcessError> {
        Ok((
            self.store().get_compressed_height()?,
            self.check_in_compress(),
        ))
    }
}
