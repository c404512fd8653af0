//! Pure in-memory page source (§4.3 "Memory" variant, §6.2 `OpenMemory`).
//!
//! Grounded on the teacher's `StoredDb`, which owns every page as a
//! `Vec<u8>` inside a `HashMap` for the database's whole lifetime
//! (`stored_db.rs`); this variant is the degenerate single-source case
//! of that idea with no backing file at all, used for scratch
//! databases and tests.

use std::sync::Mutex;

use bytes::Bytes;

use super::{validate_page_num, PageNum, PageSource};
use crate::error::Error;

pub struct MemoryPageSource {
    pages: Mutex<Vec<Bytes>>,
    page_size: u32,
}

impl MemoryPageSource {
    /// Creates an empty in-memory source with the given page size.
    pub fn new(page_size: u32) -> Self {
        MemoryPageSource {
            pages: Mutex::new(Vec::new()),
            page_size,
        }
    }

    /// Creates an in-memory source pre-populated from whole-file bytes,
    /// split into `page_size`-sized chunks (the last chunk zero-padded
    /// if short).
    pub fn from_bytes(data: &[u8], page_size: u32) -> Self {
        let mut pages = Vec::with_capacity(data.len() / page_size as usize + 1);
        let mut chunks = data.chunks(page_size as usize);
        for chunk in &mut chunks {
            if chunk.len() == page_size as usize {
                pages.push(Bytes::copy_from_slice(chunk));
            } else {
                let mut padded = vec![0u8; page_size as usize];
                padded[..chunk.len()].copy_from_slice(chunk);
                pages.push(Bytes::from(padded));
            }
        }
        MemoryPageSource {
            pages: Mutex::new(pages),
            page_size,
        }
    }
}

impl PageSource for MemoryPageSource {
    fn page_count(&self) -> PageNum {
        self.pages.lock().unwrap().len() as PageNum
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn get_page(&self, n: PageNum) -> Result<Bytes, Error> {
        let pages = self.pages.lock().unwrap();
        validate_page_num(n, pages.len() as PageNum)?;
        Ok(pages[(n - 1) as usize].clone())
    }

    fn write_page(&self, n: PageNum, content: &[u8]) -> Result<(), Error> {
        if content.len() != self.page_size as usize {
            return Err(Error::InvalidArgument(
                "write_page content must equal the page size".into(),
            ));
        }
        let mut pages = self.pages.lock().unwrap();
        let idx = (n - 1) as usize;
        if idx == pages.len() {
            pages.push(Bytes::copy_from_slice(content));
        } else if idx < pages.len() {
            pages[idx] = Bytes::copy_from_slice(content);
        } else {
            return Err(Error::InvalidArgument(
                "cannot write past one page beyond the current end".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_one_page_at_a_time() {
        let src = MemoryPageSource::new(16);
        assert_eq!(src.page_count(), 0);
        src.write_page(1, &[1u8; 16]).unwrap();
        assert_eq!(src.page_count(), 1);
        src.write_page(2, &[2u8; 16]).unwrap();
        assert_eq!(src.page_count(), 2);
        assert!(src.write_page(4, &[0u8; 16]).is_err());
    }

    #[test]
    fn from_bytes_pads_last_chunk() {
        let data = [1u8, 2, 3];
        let src = MemoryPageSource::from_bytes(&data, 16);
        assert_eq!(src.page_count(), 1);
        let page = src.get_page(1).unwrap();
        assert_eq!(&page[..3], &[1, 2, 3]);
        assert_eq!(page[3], 0);
    }
}
