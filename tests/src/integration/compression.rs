//! Compression lifecycle round trips over the real segment log with the
//! gzip backend: sealed segments compress, reads decompress on demand,
//! reap passes clear both file classes, and every byte still comes back.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use archive_process::{ArchiveService, MemKvOpener, ProcessError, StorageConfig};
    use archive_storage::StorageError;
    use archive_types::testing::build_chain;
    use archive_types::BlockWithRwSet;
    use tempfile::TempDir;

    /// Roughly one block per segment so a short chain seals several.
    fn archived_service(dir: &TempDir, chain: &[BlockWithRwSet]) -> (ArchiveService, String) {
        let config = StorageConfig::for_testing(dir.path(), 600);
        let service = ArchiveService::open(config, Arc::new(MemKvOpener::new())).unwrap();
        service.register_chain(&chain[0]).unwrap();
        let genesis_hash = chain[0].block.block_hash_str();
        let processor = service.processor(&genesis_hash).unwrap();
        for bundle in &chain[1..] {
            processor.archive_block(bundle).unwrap();
        }
        (service, genesis_hash)
    }

    #[test]
    fn test_compress_then_read_back_every_block() {
        let dir = TempDir::new().unwrap();
        let chain = build_chain(12);
        let (service, genesis_hash) = archived_service(&dir, &chain);
        let processor = service.processor(&genesis_hash).unwrap();

        let (start, end) = processor.compress_under_height(11).unwrap().unwrap();
        assert_eq!(start, 0);
        assert!((1..11).contains(&end), "unexpected compressed range end {end}");
        assert_eq!(processor.compress_status().unwrap(), (Some(end), false));

        // Cold reads transparently decompress; warm heights read the
        // plaintext log directly.
        for (height, bundle) in chain.iter().enumerate() {
            assert_eq!(
                processor.get_block_with_rwset(height as u64).unwrap().unwrap(),
                *bundle
            );
            let tx = &bundle.block.txs[0];
            assert_eq!(processor.get_tx(&tx.tx_id).unwrap().unwrap(), *tx);
        }
    }

    #[test]
    fn test_recompression_below_marker_is_rejected() {
        let dir = TempDir::new().unwrap();
        let chain = build_chain(10);
        let (service, genesis_hash) = archived_service(&dir, &chain);
        let processor = service.processor(&genesis_hash).unwrap();

        let (_, end) = processor.compress_under_height(9).unwrap().unwrap();
        let err = processor.compress_under_height(end).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Storage(StorageError::AlreadyCompressed(_))
        ));
    }

    #[test]
    fn test_reap_then_reread_decompresses_again() {
        let dir = TempDir::new().unwrap();
        let chain = build_chain(12);
        let (service, genesis_hash) = archived_service(&dir, &chain);
        let processor = service.processor(&genesis_hash).unwrap();
        let store = processor.store();

        let (_, end) = processor.compress_under_height(11).unwrap().unwrap();
        // Pull a compressed block so a decompressed copy exists.
        assert!(processor.get_block(0).unwrap().is_some());

        // for_testing retention is negative, so one pass reaps both the
        // plaintext originals and the decompressed copies immediately.
        store.reap_files(false, -1).unwrap();
        store.reap_files(true, -1).unwrap();

        // With the plaintext originals gone, reads must decompress from
        // the compressed copies again.
        for height in 0..=end {
            assert_eq!(
                store.get_block(height).unwrap().unwrap(),
                chain[height as usize]
            );
        }
        // Heights past the marker never left the plaintext log.
        assert_eq!(
            store.get_block(11).unwrap().unwrap(),
            chain[11]
        );
    }

    #[test]
    fn test_compression_survives_restart() {
        let dir = TempDir::new().unwrap();
        let opener = Arc::new(MemKvOpener::new());
        let chain = build_chain(10);
        let genesis_hash = chain[0].block.block_hash_str();
        let end;

        {
            let config = StorageConfig::for_testing(dir.path(), 600);
            let service = ArchiveService::open(config, opener.clone()).unwrap();
            service.register_chain(&chain[0]).unwrap();
            let processor = service.processor(&genesis_hash).unwrap();
            for bundle in &chain[1..] {
                processor.archive_block(bundle).unwrap();
            }
            end = processor.compress_under_height(9).unwrap().unwrap().1;
        }

        let config = StorageConfig::for_testing(dir.path(), 600);
        let service = ArchiveService::open(config, opener).unwrap();
        let processor = service.processor(&genesis_hash).unwrap();
        assert_eq!(processor.compress_status().unwrap(), (Some(end), false));
        for (height, bundle) in chain.iter().enumerate() {
            assert_eq!(
                processor.get_block(height as u64).unwrap().unwrap(),
                bundle.block
            );
        }
    }
}
