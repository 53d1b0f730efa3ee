//! Crash recovery over the real segment log: the log write lands before
//! the index flush, so a kill between the two leaves the KV savepoint
//! behind the log. Reconstruction must replay the difference and end up
//! byte-identical to the unharmed path, no matter how often it runs.

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use archive_kv::MemKvStore;
    use archive_process::{ChainProcessor, ServerLatch, StorageConfig};
    use archive_storage::{BlockIndexStore, IndexedBlock, LogOptions, SegmentLog};
    use archive_types::serialize_block;
    use archive_types::testing::{build_chain, build_genesis_block, TEST_CHAIN_ID};
    use archive_types::BlockWithRwSet;
    use tempfile::TempDir;

    /// One active segment holds everything; recovery replays from it.
    fn open_store(dir: &Path, kv: Arc<MemKvStore>) -> Arc<BlockIndexStore> {
        let log = SegmentLog::open(
            dir.join("blocks"),
            dir.join("compress"),
            dir.join("decompress"),
            LogOptions::for_testing(64 * 1024),
        )
        .unwrap();
        Arc::new(BlockIndexStore::new(TEST_CHAIN_ID, kv, Arc::new(log)))
    }

    /// Append the whole chain to the log but only commit the index for
    /// the first `committed` blocks, simulating a crash between the log
    /// write and the KV flush.
    fn crash_after(store: &BlockIndexStore, chain: &[BlockWithRwSet], committed: usize) {
        for (i, bundle) in chain.iter().enumerate() {
            let parts = serialize_block(bundle).unwrap();
            let height = bundle.block.header.block_height;
            let (location, boundary) = store.binlog().write(height + 1, &parts.bytes).unwrap();
            if i < committed {
                let indexed = IndexedBlock::new(bundle.clone(), &parts, location, boundary);
                store.commit_block(&indexed, true).unwrap();
                store.commit_block(&indexed, false).unwrap();
            }
        }
    }

    fn reload_processor(store: Arc<BlockIndexStore>) -> ChainProcessor {
        let genesis = build_genesis_block();
        ChainProcessor::new(
            genesis.block.block_hash_str(),
            TEST_CHAIN_ID,
            genesis.block.chain_config().cloned().unwrap(),
            &genesis,
            false,
            store,
            &StorageConfig::for_testing("/tmp/unused", 64 * 1024),
            ServerLatch::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_recovery_replays_log_tail_after_restart() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemKvStore::new());
        let chain = build_chain(7);

        {
            let store = open_store(dir.path(), Arc::clone(&kv));
            crash_after(&store, &chain, 4);
            assert_eq!(store.get_last_savepoint().unwrap(), Some(3));
        }

        // Restart: a fresh segment log over the same directory reloads
        // the active segment; the processor replays heights 4..=6.
        let store = open_store(dir.path(), Arc::clone(&kv));
        let processor = reload_processor(Arc::clone(&store));
        assert_eq!(processor.archived_height(), 6);
        assert_eq!(store.get_last_savepoint().unwrap(), Some(6));
        for (height, bundle) in chain.iter().enumerate() {
            assert_eq!(
                store.get_block(height as u64).unwrap().unwrap(),
                *bundle
            );
        }
        // Replayed secondary indexes resolve too.
        let tx = &chain[5].block.txs[0];
        assert_eq!(processor.get_tx_height(&tx.tx_id).unwrap(), Some(5));
        assert_eq!(
            processor
                .get_height_by_hash(&chain[6].block.header.block_hash)
                .unwrap(),
            Some(6)
        );
    }

    #[test]
    fn test_recovery_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemKvStore::new());
        let chain = build_chain(5);

        {
            let store = open_store(dir.path(), Arc::clone(&kv));
            crash_after(&store, &chain, 2);
        }

        for _ in 0..2 {
            let store = open_store(dir.path(), Arc::clone(&kv));
            let processor = reload_processor(Arc::clone(&store));
            assert_eq!(processor.archived_height(), 4);
            assert_eq!(store.get_block(4).unwrap().unwrap(), chain[4]);
        }
    }

    #[test]
    fn test_recovered_chain_keeps_archiving() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemKvStore::new());
        let chain = build_chain(8);

        {
            let store = open_store(dir.path(), Arc::clone(&kv));
            crash_after(&store, &chain[..6], 5);
        }

        let store = open_store(dir.path(), Arc::clone(&kv));
        let processor = reload_processor(store);
        assert_eq!(processor.archived_height(), 5);
        for bundle in &chain[6..] {
            processor.archive_block(bundle).unwrap();
        }
        assert_eq!(processor.archived_height(), 7);
        assert_eq!(processor.get_last_block().unwrap().unwrap(), chain[7]);
    }

    #[test]
    fn test_clean_shutdown_needs_no_replay() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemKvStore::new());
        let chain = build_chain(4);

        {
            let store = open_store(dir.path(), Arc::clone(&kv));
            crash_after(&store, &chain, 4);
        }

        let store = open_store(dir.path(), Arc::clone(&kv));
        let processor = reload_processor(Arc::clone(&store));
        assert_eq!(processor.archived_height(), 3);
        assert_eq!(store.get_last_savepoint().unwrap(), Some(3));
    }
}
