//! Single-leaf-page cell insertion (§1 Non-goals: "only appends to the
//! ledger table and simple single-page inserts are supported").
//!
//! There is no split/merge engine in this crate (out of scope per
//! spec.md §1). The ledger manager (§4.13) and agent registry (§4.15)
//! both only ever append rows whose rowid is strictly greater than
//! every rowid already on the page, assigned by the caller's own
//! monotonic counter, so appending a cell is just "grow the cell
//! pointer array by one entry and copy cell bytes into the freed
//! space at the tail" - no rebalancing is ever needed. When a page
//! genuinely runs out of room the caller gets back a plain
//! `InvalidState` error instead of a second leaf page; growing the
//! reserved tables past one page is a known limitation, not a bug.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{self, Error};

/// Builds a fresh, empty table-leaf page.
pub fn new_empty_leaf_page(page_size: u32, page_offset: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    page[page_offset] = 0x0d; // table leaf
    BigEndian::write_u16(&mut page[page_offset + 3..page_offset + 5], 0);
    let cell_content_offset = if page_size == 65536 { 0 } else { page_size as u16 };
    BigEndian::write_u16(&mut page[page_offset + 5..page_offset + 7], cell_content_offset);
    page[page_offset + 7] = 0;
    page
}

/// Appends `cell_bytes` to the tail-growing cell-content region of a
/// table-leaf page, assuming its rowid sorts after every cell already
/// present (true for both the ledger's sequence numbers and the agent
/// registry's autoincrement rowids). Fails with `InvalidState` if the
/// page has no room left, rather than attempting a split.
pub fn append_cell_to_leaf(page: &mut [u8], page_offset: usize, cell_bytes: &[u8]) -> Result<(), Error> {
    if page[page_offset] != 0x0d {
        return Err(error::corrupt("append target is not a table leaf page"));
    }
    let cell_count = BigEndian::read_u16(&page[page_offset + 3..page_offset + 5]) as usize;
    let cell_content_offset = match BigEndian::read_u16(&page[page_offset + 5..page_offset + 7]) {
        0 => page.len(),
        n => n as usize,
    };

    let new_cell_content_offset = cell_content_offset
        .checked_sub(cell_bytes.len())
        .ok_or_else(|| Error::InvalidState("leaf page is full; splitting is not supported".into()))?;
    let pointer_array_end = page_offset + 8 + 2 * (cell_count + 1);
    if pointer_array_end > new_cell_content_offset {
        return Err(Error::InvalidState(
            "leaf page is full; splitting is not supported".into(),
        ));
    }

    page[new_cell_content_offset..new_cell_content_offset + cell_bytes.len()].copy_from_slice(cell_bytes);

    let pointer_slot = page_offset + 8 + 2 * cell_count;
    BigEndian::write_u16(&mut page[pointer_slot..pointer_slot + 2], new_cell_content_offset as u16);

    BigEndian::write_u16(&mut page[page_offset + 3..page_offset + 5], (cell_count + 1) as u16);
    let encoded_offset = if new_cell_content_offset == page.len() {
        0
    } else {
        new_cell_content_offset as u16
    };
    BigEndian::write_u16(&mut page[page_offset + 5..page_offset + 7], encoded_offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::cell;

    #[test]
    fn appends_grow_the_page_without_colliding_with_the_pointer_array() {
        let mut page = new_empty_leaf_page(512, 0);
        let mut cell_bytes = Vec::new();
        cell::build_table_leaf_cell(1, b"hello", 512, &mut cell_bytes);
        append_cell_to_leaf(&mut page, 0, &cell_bytes).unwrap();
        assert_eq!(BigEndian::read_u16(&page[3..5]), 1);

        let mut cell_bytes2 = Vec::new();
        cell::build_table_leaf_cell(2, b"world!", 512, &mut cell_bytes2);
        append_cell_to_leaf(&mut page, 0, &cell_bytes2).unwrap();
        assert_eq!(BigEndian::read_u16(&page[3..5]), 2);

        let hdr = crate::btree::header::BtreeHeader::parse(&page, 0).unwrap();
        assert_eq!(hdr.cell_count, 2);
        let ptr0 = hdr.get_cell_pointer(&page, 0, 0).unwrap() as usize;
        let parsed0 = cell::parse_table_leaf_cell(&page[ptr0..]).unwrap();
        assert_eq!(parsed0.rowid, 1);
    }

    #[test]
    fn fails_closed_when_the_page_is_full() {
        let mut page = new_empty_leaf_page(64, 0);
        let mut cell_bytes = Vec::new();
        cell::build_table_leaf_cell(1, &[0u8; 64], 64, &mut cell_bytes);
        assert!(append_cell_to_leaf(&mut page, 0, &cell_bytes).is_err());
    }
}
