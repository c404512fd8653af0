//! Cell parsing and building (§4.7).
//!
//! Grounded on the teacher's `btree/cell.rs` (generic cell-pointer-array
//! walk) and `btree/leaf.rs` (table leaf cell varint layout: payload
//! length, then rowid, then inline bytes) and `btree/interior.rs`
//! (table interior cell layout: 4-byte left child, then key varint).
//! **Redesign**: the teacher's leaf cell reader gives up with
//! `unimplemented!("Spilled payloads not implemented.")` whenever a
//! cell's payload doesn't fit entirely inline; this module adds
//! `calculate_inline_payload_size` (§3.3's formula) so the cursor layer
//! knows exactly how many bytes are inline versus in the overflow
//! chain, plus the `build_table_leaf_cell` encode direction the
//! teacher never needed.

use crate::error::{self, Error};
use crate::varint;

/// A parsed table leaf cell (§4.7 `ParseTableLeafCell`).
#[derive(Debug, Clone, Copy)]
pub struct TableLeafCell {
    /// Bytes consumed by the payload-size and rowid varints.
    pub header_len: usize,
    /// Total payload size, including any overflow.
    pub payload_size: usize,
    pub rowid: i64,
}

/// Parses the varint-prefixed header of a table leaf cell. `cell`
/// starts at the cell's first byte (the payload-size varint) and need
/// only contain enough bytes to cover the two varints.
pub fn parse_table_leaf_cell(cell: &[u8]) -> Result<TableLeafCell, Error> {
    let (payload_size, n1) = varint::read_varint(cell)?;
    let (rowid, n2) = varint::read_varint(&cell[n1..])?;
    if payload_size < 0 {
        return Err(error::corrupt("negative payload size in table leaf cell"));
    }
    Ok(TableLeafCell {
        header_len: n1 + n2,
        payload_size: payload_size as usize,
        rowid,
    })
}

/// A parsed table interior cell: a left-child page number followed by
/// the largest key present in that child's subtree.
#[derive(Debug, Clone, Copy)]
pub struct TableInteriorCell {
    pub left_child_page: u32,
    pub key: i64,
}

pub fn parse_table_interior_cell(cell: &[u8]) -> Result<TableInteriorCell, Error> {
    if cell.len() < 4 {
        return Err(error::corrupt("interior cell shorter than the left-child pointer"));
    }
    let left_child_page = u32::from_be_bytes(cell[0..4].try_into().unwrap());
    let (key, _) = varint::read_varint(&cell[4..])?;
    Ok(TableInteriorCell { left_child_page, key })
}

/// Minimum embedded payload, `M` in §3.3's formula.
fn min_local(usable_page_size: u32) -> i64 {
    (((usable_page_size as i64 - 12) * 32) / 255) - 23
}

/// Applies the inline-payload-limit formula from §3.3 to determine how
/// many of `payload_size` bytes are stored inline on the leaf page; the
/// remainder spills to the overflow chain.
pub fn calculate_inline_payload_size(payload_size: usize, usable_page_size: u32) -> usize {
    let u = usable_page_size as i64;
    let max_local = u - 35;
    if (payload_size as i64) <= max_local {
        return payload_size;
    }
    let m = min_local(usable_page_size);
    let k = m + (((payload_size as i64 - m) * 32) / 255);
    let local = if k <= max_local { k } else { m };
    local.max(0) as usize
}

/// Writes the inverse of [`parse_table_leaf_cell`] plus inline payload
/// bytes: `[payload_size_varint, rowid_varint, inline_bytes...]`,
/// followed by the first overflow page pointer if `payload` doesn't
/// fit entirely inline. Returns the byte range of `payload` that was
/// written inline (the rest is the caller's responsibility to spill).
pub fn build_table_leaf_cell(
    rowid: i64,
    payload: &[u8],
    usable_page_size: u32,
    dest: &mut Vec<u8>,
) -> usize {
    dest.clear();
    let mut scratch = [0u8; varint::MAX_VARINT_LEN];
    let n = varint::write_varint(payload.len() as i64, &mut scratch);
    dest.extend_from_slice(&scratch[..n]);
    let n = varint::write_varint(rowid, &mut scratch);
    dest.extend_from_slice(&scratch[..n]);

    let inline_len = calculate_inline_payload_size(payload.len(), usable_page_size);
    dest.extend_from_slice(&payload[..inline_len]);
    inline_len
}
