//! # StoreInfo
//!
//! The location handle every index entry resolves to: which segment file,
//! at what byte offset, for how many bytes. It is the sole interchange
//! format between the index layer and the block log, independent of
//! whether the segment has been compressed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a byte span inside a segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoreInfo {
    /// Segment file name: 20-digit zero-padded first logical index, no
    /// suffix.
    pub file_name: String,
    /// Byte offset of the span inside the (plaintext) segment file.
    pub offset: u64,
    /// Length of the span in bytes.
    pub byte_len: u64,
}

impl StoreInfo {
    pub fn new(file_name: impl Into<String>, offset: u64, byte_len: u64) -> Self {
        Self {
            file_name: file_name.into(),
            offset,
            byte_len,
        }
    }

    /// A span nested inside this one, expressed in absolute file terms.
    ///
    /// Used to turn payload-relative section offsets into file offsets.
    pub fn nested(&self, relative_offset: u64, byte_len: u64) -> StoreInfo {
        StoreInfo {
            file_name: self.file_name.clone(),
            offset: self.offset + relative_offset,
            byte_len,
        }
    }

    /// First logical index stored in the owning segment, parsed from the
    /// file name. Segment files are named for `height + 1`, so the first
    /// height in the segment is this value minus one.
    pub fn segment_first_index(&self) -> Option<u64> {
        self.file_name.parse::<u64>().ok()
    }
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, offset: {}, byte_len: {}",
            self.file_name, self.offset, self.byte_len
        )
    }
}
