//! Random-access file-backed page source (§4.3 "File" variant).
//!
//! Grounded on the teacher's `Pager::read_page_from_file`
//! (`pager.rs`), which seeks to `(pn-1)*PAGE_SIZE` and reads exactly
//! one page. The teacher caches every page it has ever read in a
//! growable `Vec<Option<Vec<u8>>>`; this variant deliberately does
//! not cache (caching is `CachedPageSource`'s job) and instead reads
//! straight through on every call, matching §4.3's description of the
//! uncached file source.
//!
//! Not thread-safe: the file handle is wrapped in a `RefCell`, so this
//! type is `!Sync` and the borrow checker enforces the single-threaded
//! contract the spec calls out, rather than merely documenting it.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;

use super::{validate_page_num, PageNum, PageSource};
use crate::error::Error;

pub struct FilePageSource {
    file: RefCell<File>,
    page_size: u32,
    read_write: bool,
}

impl FilePageSource {
    /// Opens `path` read-only.
    pub fn open(path: &str, page_size: u32) -> Result<Self, Error> {
        let file = File::options().read(true).write(false).open(path)?;
        Ok(FilePageSource {
            file: RefCell::new(file),
            page_size,
            read_write: false,
        })
    }

    /// Opens `path` for reading and writing (§6.3 `ReadWrite` option).
    pub fn open_read_write(path: &str, page_size: u32) -> Result<Self, Error> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(FilePageSource {
            file: RefCell::new(file),
            page_size,
            read_write: true,
        })
    }

    fn file_len(&self) -> Result<u64, Error> {
        Ok(self.file.borrow().metadata()?.len())
    }
}

impl PageSource for FilePageSource {
    fn page_count(&self) -> PageNum {
        match self.file_len() {
            Ok(len) => (len / self.page_size as u64) as PageNum,
            Err(_) => 0,
        }
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn get_page(&self, n: PageNum) -> Result<Bytes, Error> {
        validate_page_num(n, self.page_count())?;
        let mut f = self.file.borrow_mut();
        f.seek(SeekFrom::Start((n - 1) as u64 * self.page_size as u64))?;
        let mut buf = vec![0u8; self.page_size as usize];
        f.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn write_page(&self, n: PageNum, content: &[u8]) -> Result<(), Error> {
        if !self.read_write {
            return Err(Error::InvalidState("page source opened read-only".into()));
        }
        if content.len() != self.page_size as usize {
            return Err(Error::InvalidArgument(
                "write_page content must equal the page size".into(),
            ));
        }
        let count = self.page_count();
        if n > count + 1 {
            return Err(Error::InvalidArgument(
                "cannot write past one page beyond the current end of file".into(),
            ));
        }
        let mut f = self.file.borrow_mut();
        f.seek(SeekFrom::Start((n - 1) as u64 * self.page_size as u64))?;
        f.write_all(content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp_db(pages: &[[u8; 16]]) -> tempfile_shim::TempFile {
        let mut tf = tempfile_shim::TempFile::new();
        for p in pages {
            tf.file.write_all(p).unwrap();
        }
        tf
    }

    // Minimal stand-in for a temp-file helper crate: writes to a
    // unique path under the OS temp dir and removes it on drop.
    mod tempfile_shim {
        use std::fs::File;
        use std::path::PathBuf;

        pub struct TempFile {
            pub path: PathBuf,
            pub file: File,
        }

        impl TempFile {
            pub fn new() -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!(
                    "sharc-test-{}-{}.db",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                ));
                let file = File::options()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)
                    .unwrap();
                TempFile { path, file }
            }
        }

        impl Drop for TempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn reads_pages_at_correct_offsets() {
        let mut p1 = [0u8; 16];
        p1[0] = 1;
        let mut p2 = [0u8; 16];
        p2[0] = 2;
        let tf = write_temp_db(&[p1, p2]);
        let src = FilePageSource::open(tf.path.to_str().unwrap(), 16).unwrap();
        assert_eq!(src.page_count(), 2);
        assert_eq!(src.get_page(1).unwrap()[0], 1);
        assert_eq!(src.get_page(2).unwrap()[0], 2);
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let tf = write_temp_db(&[[0u8; 16]]);
        let src = FilePageSource::open(tf.path.to_str().unwrap(), 16).unwrap();
        assert!(src.get_page(2).is_err());
    }
}
