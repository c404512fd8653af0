//! Page-addressed byte storage (§3.1, §4.3).
//!
//! `PageSource` is the narrow contract every storage backend implements;
//! grounded on the teacher's `Pager` (`pager.rs`, in-memory cache of
//! on-demand pages behind a `Vec<Option<Vec<u8>>>`) and `StoredDb`
//! (`stored_db.rs`, eager whole-file read into a `HashMap<PageNum,
//! Vec<u8>>`). Pages are handed out as [`bytes::Bytes`] — a cheaply
//! cloneable, reference-counted, immutable buffer — rather than as a
//! borrowed slice with a hand-tracked lifetime: this sidesteps the
//! aliasing problems the teacher's code works around with `RefCell`
//! (see the doc-tests in `stored_db.rs` showing what borrow patterns
//! are and are not allowed) while keeping reads zero-copy on the
//! common cache-hit path. `bytes` is already part of the wider example
//! pack's stack (`h-arry-smith-codecrafters-sqlite-rust`,
//! `Daniel-Boll-build-your-own-x-in-y`), adopted here for the same
//! "helps manage buffers" role.

mod cached;
mod file;
mod memory;
mod mmap;

pub use cached::CachedPageSource;
pub use file::FilePageSource;
pub use memory::MemoryPageSource;
pub use mmap::MmapPageSource;

use crate::error::Error;
use bytes::Bytes;

/// 1-based page number, matching SQLite's own numbering (page 1 holds
/// the 100-byte database header at its start).
pub type PageNum = u32;

/// A page-transform hook (§4.3), identity by default. A future
/// encryption layer (AES-256-GCM + KDF) would implement this to wrap
/// and unwrap page contents; the transform must be symmetric and
/// side-effect free, and may declare a larger on-disk page size to make
/// room for a per-page authentication tag.
pub trait PageTransform: Send + Sync {
    /// Called after a page is read from the backing store, before it is
    /// handed to callers.
    fn untransform(&self, page_num: PageNum, raw: Bytes) -> Result<Bytes, Error>;

    /// Called before a page is written to the backing store.
    fn transform(&self, page_num: PageNum, plain: &[u8]) -> Result<Bytes, Error>;

    /// On-disk page size after transformation (>= logical page size).
    fn transformed_page_size(&self, logical_page_size: u32) -> u32 {
        logical_page_size
    }
}

/// Identity transform: the default when no encryption layer is in use.
pub struct IdentityTransform;

impl PageTransform for IdentityTransform {
    fn untransform(&self, _page_num: PageNum, raw: Bytes) -> Result<Bytes, Error> {
        Ok(raw)
    }

    fn transform(&self, _page_num: PageNum, plain: &[u8]) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(plain))
    }
}

/// Contract shared by every page-addressed storage backend (§4.3).
///
/// Implementations own the backing memory; callers receive an
/// immutable, reference-counted view. `get_page` never requires `&mut
/// self` so that multiple cursors can read concurrently (interior
/// mutability, if any, is the implementation's concern and is called
/// out per variant below).
pub trait PageSource {
    /// Current number of pages in the source.
    fn page_count(&self) -> PageNum;

    /// Logical page size in bytes (a power of two, 512-65536).
    fn page_size(&self) -> u32;

    /// Returns the bytes of page `n` (1-based). The returned buffer is
    /// exactly `page_size()` bytes.
    fn get_page(&self, n: PageNum) -> Result<Bytes, Error>;

    /// Writes `content` (exactly `page_size()` bytes) as page `n`.
    /// Grows the backing store by one page if `n == page_count() + 1`.
    /// Read-only variants return [`Error::InvalidState`].
    fn write_page(&self, n: PageNum, content: &[u8]) -> Result<(), Error> {
        let _ = (n, content);
        Err(Error::InvalidState("page source is read-only".into()))
    }
}

pub(crate) fn validate_page_num(n: PageNum, count: PageNum) -> Result<(), Error> {
    if n == 0 {
        return Err(Error::InvalidArgument("page numbers are 1-based".into()));
    }
    if n > count {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("page {n} beyond the {count} pages present"),
        )));
    }
    Ok(())
}
