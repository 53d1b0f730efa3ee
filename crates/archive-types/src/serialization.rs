//! # Block Payload Wire Format
//!
//! The block log stores one opaque payload per block. Internally the
//! payload is sectioned so the index layer can hand out `StoreInfo` spans
//! for individual parts without re-reading the whole block:
//!
//! ```text
//! [u32 meta_len][meta]
//! [u32 tx_count] { [u32 tx_len][tx] }*
//! [u32 rw_count] { [u32 rw_len][rwset] }*
//! ```
//!
//! All length prefixes are little-endian u32; every section body is
//! bincode. Section offsets recorded during serialization point at the
//! section *body* (past its length prefix), so reading `(offset, len)`
//! straight from the file yields exactly one decodable section.

use crate::entities::{Block, BlockHeader, BlockWithRwSet, Transaction, TxRwSet};
use crate::errors::TypesError;
use serde::{Deserialize, Serialize};

/// Header-only view of a block: enough to answer meta queries without
/// touching transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMeta {
    pub header: BlockHeader,
    pub tx_ids: Vec<String>,
}

/// A byte span relative to the start of the block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpan {
    pub offset: u64,
    pub byte_len: u64,
}

/// A fully serialized block payload plus the spans of its sections.
#[derive(Debug, Clone)]
pub struct SerializedBlockParts {
    /// The complete payload written to the block log.
    pub bytes: Vec<u8>,
    /// Span of the header/meta section.
    pub meta: SectionSpan,
    /// Span of each transaction, in block order.
    pub txs: Vec<SectionSpan>,
    /// Span of each read/write set, in block order.
    pub rwsets: Vec<SectionSpan>,
}

fn push_section(out: &mut Vec<u8>, body: &[u8]) -> SectionSpan {
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    let offset = out.len() as u64;
    out.extend_from_slice(body);
    SectionSpan {
        offset,
        byte_len: body.len() as u64,
    }
}

/// Serialize a block bundle into the sectioned payload format.
pub fn serialize_block(bundle: &BlockWithRwSet) -> Result<SerializedBlockParts, TypesError> {
    let meta = SerializedMeta {
        header: bundle.block.header.clone(),
        tx_ids: bundle.block.txs.iter().map(|tx| tx.tx_id.clone()).collect(),
    };
    let meta_body = bincode::serialize(&meta)?;

    let mut bytes = Vec::with_capacity(meta_body.len() + 64);
    let meta_span = push_section(&mut bytes, &meta_body);

    bytes.extend_from_slice(&(bundle.block.txs.len() as u32).to_le_bytes());
    let mut tx_spans = Vec::with_capacity(bundle.block.txs.len());
    for tx in &bundle.block.txs {
        let body = bincode::serialize(tx)?;
        tx_spans.push(push_section(&mut bytes, &body));
    }

    bytes.extend_from_slice(&(bundle.rwsets.len() as u32).to_le_bytes());
    let mut rw_spans = Vec::with_capacity(bundle.rwsets.len());
    for rwset in &bundle.rwsets {
        let body = bincode::serialize(rwset)?;
        rw_spans.push(push_section(&mut bytes, &body));
    }

    Ok(SerializedBlockParts {
        bytes,
        meta: meta_span,
        txs: tx_spans,
        rwsets: rw_spans,
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u32(&mut self) -> Result<u32, TypesError> {
        if self.pos + 4 > self.data.len() {
            return Err(TypesError::MalformedPayload("truncated length prefix"));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_section(&mut self) -> Result<&'a [u8], TypesError> {
        let len = self.read_u32()? as usize;
        if self.pos + len > self.data.len() {
            return Err(TypesError::MalformedPayload("truncated section body"));
        }
        let body = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(body)
    }
}

/// Decode just the meta section body (as addressed by a meta `StoreInfo`).
pub fn deserialize_meta(body: &[u8]) -> Result<SerializedMeta, TypesError> {
    Ok(bincode::deserialize(body)?)
}

/// Decode a complete block payload back into the block bundle.
pub fn deserialize_block(payload: &[u8]) -> Result<BlockWithRwSet, TypesError> {
    let mut cursor = Cursor {
        data: payload,
        pos: 0,
    };
    let meta: SerializedMeta = bincode::deserialize(cursor.read_section()?)?;

    let tx_count = cursor.read_u32()? as usize;
    let mut txs: Vec<Transaction> = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        txs.push(bincode::deserialize(cursor.read_section()?)?);
    }

    let rw_count = cursor.read_u32()? as usize;
    let mut rwsets: Vec<TxRwSet> = Vec::with_capacity(rw_count);
    for _ in 0..rw_count {
        rwsets.push(bincode::deserialize(cursor.read_section()?)?);
    }

    Ok(BlockWithRwSet {
        block: Block {
            header: meta.header,
            txs,
        },
        rwsets,
    })
}
