//! The block log contract consumed by the index layer.
//!
//! [`SegmentLog`](crate::SegmentLog) is the production implementation;
//! [`MemBinLog`] is an in-memory double with the same segment-boundary
//! arithmetic, used by processor and index tests.

use crate::error::StorageError;
use archive_types::StoreInfo;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

/// Boundary record emitted by a write that sealed a segment. This is the
/// only mechanism the index layer has to learn where segment boundaries
/// fall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentBoundary {
    /// First block height in the sealed segment.
    pub begin_height: u64,
    /// Last block height in the sealed segment.
    pub end_height: u64,
    /// True when this write sealed a segment and the mapping must be
    /// recorded.
    pub need_record: bool,
}

/// Contract between the index layer and the block log.
pub trait BinLog: Send + Sync {
    /// Append the entry for logical `index` (block height + 1).
    fn write(&self, index: u64, data: &[u8]) -> Result<(StoreInfo, SegmentBoundary), StorageError>;

    /// Logical index of the last entry, zero when empty.
    fn last_index(&self) -> Result<u64, StorageError>;

    /// Read an entry still resident in the active segment.
    fn read_last_seg_section(&self, index: u64) -> Result<(Vec<u8>, StoreInfo), StorageError>;

    /// Read a byte span; `is_decompressed` selects the decompression
    /// directory over the primary log directory.
    fn read_file_section(
        &self,
        is_decompressed: bool,
        location: &StoreInfo,
    ) -> Result<Vec<u8>, StorageError>;

    /// Upper bound for the compression walk: one less than the active
    /// segment's first height. Only whole segments whose end height is
    /// strictly below this bound are compressed, which keeps the sealed
    /// segment adjacent to the active one in plaintext.
    fn can_compress_height(&self) -> u64;

    /// Compress the segment whose first height is `start_height`; returns
    /// the segment name.
    fn compress_file_by_start_height(&self, start_height: u64) -> Result<String, StorageError>;

    /// Whether a decompressed copy of `file_name` exists, with its last
    /// access time (unix seconds).
    fn check_decompress_file_exist(&self, file_name: &str) -> Result<(bool, i64), StorageError>;

    /// Decompress the compressed copy of `file_name` into the
    /// decompression directory; returns the decompressed file name.
    fn decompress_file(&self, file_name: &str) -> Result<String, StorageError>;

    /// Remove `file_name` from the primary (or decompression) directory if
    /// it exists and is outside the retention window. Returns whether the
    /// file was actually removed; absence is not an error.
    fn try_remove_file(&self, file_name: &str, is_decompressed: bool)
        -> Result<bool, StorageError>;

    fn close(&self) -> Result<(), StorageError>;
}

/// Render a logical index as a 20-digit zero-padded segment name.
pub fn segment_name(index: u64) -> String {
    format!("{index:020}")
}

#[derive(Default)]
struct MemInner {
    // Raw per-segment buffers, keyed by segment name.
    segments: BTreeMap<String, Vec<u8>>,
    // Location of each entry; position i holds logical index i + 1.
    locations: Vec<StoreInfo>,
    compressed: HashSet<String>,
    decompressed: HashSet<String>,
    removed: HashSet<String>,
    closed: bool,
}

/// In-memory [`BinLog`] with count-based segment rotation.
pub struct MemBinLog {
    entries_per_segment: u64,
    inner: RwLock<MemInner>,
}

impl MemBinLog {
    /// `entries_per_segment` controls when a write seals the active
    /// segment, standing in for the byte-size threshold of the real log.
    pub fn new(entries_per_segment: u64) -> Self {
        Self {
            entries_per_segment: entries_per_segment.max(1),
            inner: RwLock::new(MemInner::default()),
        }
    }

    fn segment_first_index(&self, index: u64) -> u64 {
        ((index - 1) / self.entries_per_segment) * self.entries_per_segment + 1
    }
}

impl BinLog for MemBinLog {
    fn write(&self, index: u64, data: &[u8]) -> Result<(StoreInfo, SegmentBoundary), StorageError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        let expected = inner.locations.len() as u64 + 1;
        if index != expected {
            return Err(StorageError::OutOfOrder {
                expected,
                got: index,
            });
        }

        let first = self.segment_first_index(index);
        let name = segment_name(first);
        let mut boundary = SegmentBoundary::default();
        if first == index && index > 1 {
            let prev_first = first - self.entries_per_segment;
            boundary = SegmentBoundary {
                begin_height: prev_first - 1,
                end_height: index - 2,
                need_record: true,
            };
        }

        let buf = inner.segments.entry(name.clone()).or_default();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        let location = StoreInfo::new(name, offset, data.len() as u64);
        inner.locations.push(location.clone());
        Ok((location, boundary))
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(inner.locations.len() as u64)
    }

    fn read_last_seg_section(&self, index: u64) -> Result<(Vec<u8>, StoreInfo), StorageError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        if index == 0 || index > inner.locations.len() as u64 {
            return Err(StorageError::NotFound);
        }
        let location = inner.locations[(index - 1) as usize].clone();
        let buf = inner
            .segments
            .get(&location.file_name)
            .ok_or(StorageError::NotFound)?;
        let start = location.offset as usize;
        let end = start + location.byte_len as usize;
        Ok((buf[start..end].to_vec(), location))
    }

    fn read_file_section(
        &self,
        _is_decompressed: bool,
        location: &StoreInfo,
    ) -> Result<Vec<u8>, StorageError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        let buf = inner
            .segments
            .get(&location.file_name)
            .ok_or(StorageError::NotFound)?;
        let start = location.offset as usize;
        let end = start + location.byte_len as usize;
        if end > buf.len() {
            return Err(StorageError::InvalidIndex(format!(
                "section past end of {}",
                location.file_name
            )));
        }
        Ok(buf[start..end].to_vec())
    }

    fn can_compress_height(&self) -> u64 {
        let inner = self.inner.read();
        let last = inner.locations.len() as u64;
        if last == 0 {
            return 0;
        }
        self.segment_first_index(last).saturating_sub(2)
    }

    fn compress_file_by_start_height(&self, start_height: u64) -> Result<String, StorageError> {
        let name = segment_name(start_height + 1);
        let mut inner = self.inner.write();
        if !inner.segments.contains_key(&name) {
            return Err(StorageError::NotFound);
        }
        inner.compressed.insert(name.clone());
        Ok(name)
    }

    fn check_decompress_file_exist(&self, file_name: &str) -> Result<(bool, i64), StorageError> {
        let inner = self.inner.read();
        Ok((inner.decompressed.contains(file_name), 0))
    }

    fn decompress_file(&self, file_name: &str) -> Result<String, StorageError> {
        let mut inner = self.inner.write();
        if !inner.compressed.contains(file_name) {
            return Err(StorageError::NotFound);
        }
        inner.decompressed.insert(file_name.to_string());
        Ok(file_name.to_string())
    }

    fn try_remove_file(
        &self,
        file_name: &str,
        is_decompressed: bool,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.write();
        if is_decompressed {
            Ok(inner.decompressed.remove(file_name))
        } else {
            // The plaintext buffer stays resident so reads keep working in
            // tests; record the removal instead.
            Ok(inner.removed.insert(file_name.to_string()))
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.write().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_rejected() {
        let log = MemBinLog::new(3);
        log.write(1, b"a").unwrap();
        let err = log.write(3, b"c").unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfOrder {
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn test_boundary_emitted_on_rotation() {
        let log = MemBinLog::new(2);
        let (_, b1) = log.write(1, b"a").unwrap();
        let (_, b2) = log.write(2, b"b").unwrap();
        assert!(!b1.need_record);
        assert!(!b2.need_record);

        // Index 3 opens the second segment and seals [0, 1].
        let (loc, b3) = log.write(3, b"c").unwrap();
        assert!(b3.need_record);
        assert_eq!(b3.begin_height, 0);
        assert_eq!(b3.end_height, 1);
        assert_eq!(loc.file_name, segment_name(3));
    }

    #[test]
    fn test_can_compress_height_tracks_active_segment() {
        let log = MemBinLog::new(2);
        for i in 1..=5 {
            log.write(i, b"x").unwrap();
        }
        // Active segment holds height 4, so the bound is 3; the walk only
        // takes segments ending strictly below it, sparing [2, 3].
        assert_eq!(log.can_compress_height(), 3);
    }
}
