//! Memory-mapped page source (§4.3 "Mmap" variant).
//!
//! No direct teacher precedent (the teacher always reads pages through
//! explicit `Read` calls), so this variant is grounded on the wider
//! pack's use of `memmap2` for zero-copy file access
//! (`orbitinghail-sqlsync`'s storage layer maps whole files the same
//! way). Pages are read-only slices of one `Mmap` carved out with
//! `Bytes::copy_from_slice`; a future zero-copy variant could return
//! borrowed slices instead, but that would tie every returned page's
//! lifetime to the map and break the uniform `Bytes`-returning
//! `PageSource` contract other variants rely on.

use bytes::Bytes;
use memmap2::Mmap;

use super::{validate_page_num, PageNum, PageSource};
use crate::error::Error;

pub struct MmapPageSource {
    map: Mmap,
    page_size: u32,
}

impl MmapPageSource {
    pub fn open(path: &str, page_size: u32) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        Ok(MmapPageSource { map, page_size })
    }
}

impl PageSource for MmapPageSource {
    fn page_count(&self) -> PageNum {
        (self.map.len() / self.page_size as usize) as PageNum
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn get_page(&self, n: PageNum) -> Result<Bytes, Error> {
        validate_page_num(n, self.page_count())?;
        let start = (n - 1) as usize * self.page_size as usize;
        let end = start + self.page_size as usize;
        Ok(Bytes::copy_from_slice(&self.map[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_pages_from_a_mapped_file() {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "sharc-mmap-test-{}-{}.db",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&[1u8; 16]).unwrap();
            f.write_all(&[2u8; 16]).unwrap();
        }
        let src = MmapPageSource::open(path.to_str().unwrap(), 16).unwrap();
        assert_eq!(src.page_count(), 2);
        assert_eq!(src.get_page(2).unwrap()[0], 2);
        let _ = std::fs::remove_file(&path);
    }
}
