//! Page-level transaction buffer (§4.12).
//!
//! **[ADDED — no teacher counterpart]**. Grounded on the page-
//! ownership pattern of the teacher's `stored_db.rs`
//! (`get_page_rw`/`get_page_ro`, `open_rw_page` tracking a single
//! checked-out mutable page at a time): this module generalizes that
//! single-page discipline into a staging map so writers can stage any
//! number of pages before committing them all at once. Reads fall
//! through to the staged copy first, then to the wrapped source
//! (read-your-writes, §4.12); nothing is written to the underlying
//! source until `commit`.

use std::cell::RefCell;
use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::Error;
use crate::pager::{PageNum, PageSource};

/// Wraps a [`PageSource`] with a staging map of uncommitted page
/// writes. Implements `PageSource` itself so a [`crate::btree::cursor::Cursor`]
/// can read through a transaction exactly as it would read through the
/// bare source underneath.
pub struct Transaction<'s, S: PageSource> {
    source: &'s S,
    staged: RefCell<BTreeMap<PageNum, Vec<u8>>>,
}

impl<'s, S: PageSource> Transaction<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Transaction {
            source,
            staged: RefCell::new(BTreeMap::new()),
        }
    }

    /// True if any page has been staged but not yet committed or
    /// rolled back.
    pub fn is_dirty(&self) -> bool {
        !self.staged.borrow().is_empty()
    }

    /// Flushes every staged page to the underlying source in
    /// page-number order and clears the staging map (§4.12 `Commit`).
    pub fn commit(self) -> Result<(), Error> {
        let staged = self.staged.into_inner();
        for (page_num, bytes) in staged {
            self.source.write_page(page_num, &bytes)?;
        }
        Ok(())
    }

    /// Discards every staged page without writing anything to the
    /// underlying source (§4.12 `Rollback`). Equivalent to dropping the
    /// transaction without calling `commit`.
    pub fn rollback(self) {
        drop(self.staged.into_inner());
    }
}

impl<'s, S: PageSource> PageSource for Transaction<'s, S> {
    fn page_count(&self) -> PageNum {
        let staged_max = self.staged.borrow().keys().next_back().copied().unwrap_or(0);
        staged_max.max(self.source.page_count())
    }

    fn page_size(&self) -> u32 {
        self.source.page_size()
    }

    fn get_page(&self, n: PageNum) -> Result<Bytes, Error> {
        if let Some(bytes) = self.staged.borrow().get(&n) {
            return Ok(Bytes::copy_from_slice(bytes));
        }
        self.source.get_page(n)
    }

    fn write_page(&self, n: PageNum, content: &[u8]) -> Result<(), Error> {
        if content.len() != self.page_size() as usize {
            return Err(Error::InvalidArgument(
                "write_page content must equal the page size".into(),
            ));
        }
        self.staged.borrow_mut().insert(n, content.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::MemoryPageSource;

    #[test]
    fn reads_fall_through_to_staged_writes() {
        let src = MemoryPageSource::new(512);
        src.write_page(1, &vec![0u8; 512]).unwrap();
        let txn = Transaction::new(&src);
        let mut page = vec![1u8; 512];
        page[0] = 42;
        txn.write_page(1, &page).unwrap();
        assert_eq!(txn.get_page(1).unwrap()[0], 42);
        // underlying source is untouched until commit.
        assert_eq!(src.get_page(1).unwrap()[0], 0);
    }

    #[test]
    fn commit_flushes_in_page_number_order() {
        let src = MemoryPageSource::new(512);
        src.write_page(1, &vec![0u8; 512]).unwrap();
        src.write_page(2, &vec![0u8; 512]).unwrap();
        let txn = Transaction::new(&src);
        let mut p2 = vec![0u8; 512];
        p2[0] = 2;
        let mut p1 = vec![0u8; 512];
        p1[0] = 1;
        txn.write_page(2, &p2).unwrap();
        txn.write_page(1, &p1).unwrap();
        txn.commit().unwrap();
        assert_eq!(src.get_page(1).unwrap()[0], 1);
        assert_eq!(src.get_page(2).unwrap()[0], 2);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let src = MemoryPageSource::new(512);
        src.write_page(1, &vec![0u8; 512]).unwrap();
        let txn = Transaction::new(&src);
        txn.write_page(1, &vec![9u8; 512]).unwrap();
        txn.rollback();
        assert_eq!(src.get_page(1).unwrap()[0], 0);
    }
}
