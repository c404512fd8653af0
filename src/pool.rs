//! Shared byte-buffer pool (§9 "Global state").
//!
//! The only process-wide state in the core: a pool of reusable byte
//! buffers used by overflow-payload assembly (§4.8) and by the cached
//! page source (§4.3). Grounded in spirit on the teacher's `StoredDb`,
//! which owns a `HashMap<PageNum, Vec<u8>>` of page buffers for the
//! lifetime of the database (`stored_db.rs`); here that single-owner
//! idea is generalized into a proper lend/return pool so cursors can
//! rent a buffer for one row's overflow payload and give it back
//! instead of allocating fresh on every row.

use std::sync::Mutex;

/// A byte buffer checked out from a [`BytePool`]. Returned to the pool
/// on drop unless [`RentedBuffer::into_vec`] is called to take
/// ownership permanently.
pub struct RentedBuffer {
    buf: Option<Vec<u8>>,
    pool: &'static BytePool,
}

impl RentedBuffer {
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken")
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().expect("buffer taken")
    }

    /// Takes ownership of the underlying buffer, bypassing the pool.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.take().expect("buffer taken")
    }
}

impl Drop for RentedBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            self.pool.release(buf);
        }
    }
}

/// A simple capacity-bounded free list of `Vec<u8>` buffers.
///
/// Access is serialised under a single mutex, matching the spec's
/// requirement (§4.3) that the cached page source serialise all access
/// under one lock. A capacity of `0` turns every rent into a fresh
/// allocation and every release into a drop - the degenerate but still
/// correct case.
pub struct BytePool {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
}

impl BytePool {
    pub const fn new(max_free: usize) -> Self {
        BytePool {
            free: Mutex::new(Vec::new()),
            max_free,
        }
    }

    /// Rents a buffer with at least `min_capacity` bytes of capacity,
    /// zero-filled to `min_capacity` length.
    pub fn rent(&'static self, min_capacity: usize) -> RentedBuffer {
        let mut buf = {
            let mut free = self.free.lock().unwrap();
            free.pop().unwrap_or_default()
        };
        buf.clear();
        if buf.capacity() < min_capacity {
            buf.reserve(min_capacity - buf.capacity());
        }
        buf.resize(min_capacity, 0);
        RentedBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }
}

/// Process-wide pool used by overflow assembly and page caches.
pub static SHARED_POOL: BytePool = BytePool::new(64);
