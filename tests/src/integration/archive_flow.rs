//! End-to-end archive flow over the real segment log: register a chain,
//! stream blocks through the service, query them back across segment
//! boundaries, and come back up after a restart.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use archive_process::{ArchiveService, MemKvOpener, RegisterStatus, StorageConfig};
    use archive_storage::BlockIndexStore;
    use archive_types::testing::{build_block_with_rwset, build_chain, TEST_CHAIN_ID};
    use archive_types::{ArchiveStatus, BlockWithRwSet};
    use tempfile::TempDir;

    /// Small segments so a handful of blocks spans several files.
    fn open_service(dir: &TempDir, opener: Arc<MemKvOpener>) -> ArchiveService {
        let config = StorageConfig::for_testing(dir.path(), 900);
        ArchiveService::open(config, opener).unwrap()
    }

    fn archive_all(service: &ArchiveService, chain: &[BlockWithRwSet]) -> String {
        let status = service.register_chain(&chain[0]).unwrap();
        assert_eq!(status, RegisterStatus::Registered);
        let genesis_hash = chain[0].block.block_hash_str();
        let processor = service.processor(&genesis_hash).unwrap();
        for bundle in &chain[1..] {
            assert_eq!(
                processor.archive_block(bundle).unwrap(),
                ArchiveStatus::Archived
            );
        }
        genesis_hash
    }

    /// Every sealed segment's recorded range must chain onto the next:
    /// `end(N) + 1 == begin(N + 1)`, starting from height 0.
    fn assert_segment_map_contiguous(store: &BlockIndexStore) -> u64 {
        let mut begin = 0u64;
        let mut sealed = 0u64;
        while let Some(end) = store.get_segment_end(begin).unwrap() {
            assert!(end >= begin, "segment [{begin}, {end}] is inverted");
            begin = end + 1;
            sealed += 1;
        }
        sealed
    }

    #[test]
    fn test_register_archive_query_end_to_end() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(MemKvOpener::new()));
        let chain = build_chain(10);
        let genesis_hash = archive_all(&service, &chain);
        let processor = service.processor(&genesis_hash).unwrap();

        assert_eq!(processor.archived_height(), 9);
        assert_eq!(processor.get_last_savepoint().unwrap(), Some(9));

        // Point queries across every block, whichever segment it landed in.
        for (height, bundle) in chain.iter().enumerate() {
            let height = height as u64;
            let block = &bundle.block;
            assert_eq!(processor.get_block(height).unwrap().unwrap(), *block);
            assert_eq!(
                processor
                    .get_height_by_hash(&block.header.block_hash)
                    .unwrap(),
                Some(height)
            );
            assert_eq!(
                processor.get_header_by_height(height).unwrap().unwrap(),
                block.header
            );
            for tx in &block.txs {
                assert_eq!(processor.get_tx(&tx.tx_id).unwrap().unwrap(), *tx);
                assert_eq!(processor.get_tx_height(&tx.tx_id).unwrap(), Some(height));
            }
            for rwset in &bundle.rwsets {
                assert_eq!(
                    processor.get_rwset(&rwset.tx_id).unwrap().unwrap(),
                    *rwset
                );
            }
        }

        assert_eq!(processor.get_last_block().unwrap().unwrap(), chain[9]);
        assert_eq!(processor.get_range_blocks(3, 6).unwrap(), &chain[3..=6]);

        // The tiny segment size must have sealed several segments, and
        // their recorded ranges must chain without gaps.
        let sealed = assert_segment_map_contiguous(processor.store());
        assert!(sealed >= 2, "expected multiple sealed segments, got {sealed}");

        let statuses = service.chain_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].chain_id, TEST_CHAIN_ID);
        assert_eq!(statuses[0].genesis_hash, genesis_hash);
        assert_eq!(statuses[0].archived_height, 9);
    }

    #[test]
    fn test_protocol_rejections_never_advance_frontier() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(MemKvOpener::new()));
        let chain = build_chain(6);
        let genesis_hash = archive_all(&service, &chain);
        let processor = service.processor(&genesis_hash).unwrap();

        // Gap.
        let ahead = build_block_with_rwset(8, chain[5].block.header.block_hash, 1);
        assert!(processor.archive_block(&ahead).is_err());
        assert_eq!(processor.archived_height(), 5);

        // Broken linkage at the frontier.
        let orphan = build_block_with_rwset(6, [0xAB; 32], 1);
        assert!(processor.archive_block(&orphan).is_err());
        assert_eq!(processor.archived_height(), 5);

        // Tampered payload.
        let mut tampered = build_block_with_rwset(6, chain[5].block.header.block_hash, 1);
        tampered.block.header.tx_root = [0xCD; 32];
        assert!(processor.archive_block(&tampered).is_err());
        assert_eq!(processor.archived_height(), 5);

        // Matching re-delivery still acknowledged after the failures.
        assert_eq!(
            processor.archive_block(&chain[4]).unwrap(),
            ArchiveStatus::AlreadyArchived
        );
        assert_eq!(processor.archived_height(), 5);
    }

    #[test]
    fn test_service_restart_resumes_archiving() {
        let dir = TempDir::new().unwrap();
        let opener = Arc::new(MemKvOpener::new());
        let chain = build_chain(8);
        let genesis_hash = chain[0].block.block_hash_str();

        {
            let service = open_service(&dir, Arc::clone(&opener));
            service.register_chain(&chain[0]).unwrap();
            let processor = service.processor(&genesis_hash).unwrap();
            for bundle in &chain[1..5] {
                processor.archive_block(bundle).unwrap();
            }
        }

        // Reopened service reloads the registration and the frontier,
        // then keeps archiving where the first run stopped.
        let service = open_service(&dir, opener);
        let processor = service.processor(&genesis_hash).unwrap();
        assert_eq!(processor.archived_height(), 4);
        for bundle in &chain[5..] {
            assert_eq!(
                processor.archive_block(bundle).unwrap(),
                ArchiveStatus::Archived
            );
        }
        assert_eq!(processor.archived_height(), 7);
        assert_eq!(processor.get_block(6).unwrap().unwrap(), chain[6].block);
    }

    #[test]
    fn test_in_archive_marks_surface_in_status() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(MemKvOpener::new()));
        let chain = build_chain(2);
        let genesis_hash = archive_all(&service, &chain);
        let processor = service.processor(&genesis_hash).unwrap();

        processor.mark_in_archive();
        assert_eq!(processor.archive_status(), (1, true));
        assert!(service.chain_statuses()[0].in_archive);
        processor.mark_not_in_archive();
        assert_eq!(processor.archive_status(), (1, false));
    }
}
