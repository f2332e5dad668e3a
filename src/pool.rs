//! Fixed-geometry buffer pools backing the TCP transport's RX/TX pipelines.
//!
//! A pool hands out zeroed buffers of a fixed size and takes them back,
//! erasing them on return. Exhaustion is signalled with `None` so callers
//! fail the surrounding operation instead of blocking on the pool.

use std::sync::Mutex;

use tracing::trace;

use crate::error::Error;

/// A pool of `n_obj` byte buffers of `obj_size` bytes each.
///
/// Every buffer that leaves the pool must come back exactly once. Buffers
/// are zeroed when the pool is created and re-zeroed on return, so a buffer
/// obtained from [`get`](Self::get) is always all zeroes.
#[derive(Debug)]
pub struct BufferPool {
    obj_size: usize,
    n_obj: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Creates a pool with all `n_obj` buffers available.
    pub fn new(obj_size: usize, n_obj: usize) -> Self {
        let free = (0..n_obj).map(|_| vec![0u8; obj_size]).collect();
        Self {
            obj_size,
            n_obj,
            free: Mutex::new(free),
        }
    }

    /// Takes a zeroed buffer out of the pool, or `None` when the pool is
    /// exhausted.
    pub fn get(&self) -> Option<Vec<u8>> {
        let buf = self.free.lock().expect("pool lock poisoned").pop();
        if buf.is_none() {
            trace!(n_obj = self.n_obj, "pool exhausted");
        }
        buf
    }

    /// Restores a buffer to the pool, erasing its contents.
    ///
    /// Returning a buffer of the wrong size, or more buffers than ever left
    /// the pool, is an error.
    pub fn ret(&self, mut buf: Vec<u8>) -> Result<(), Error> {
        if buf.len() != self.obj_size {
            return Err(Error::PoolForeignBuffer {
                len: buf.len(),
                obj_size: self.obj_size,
            });
        }

        let mut free = self.free.lock().expect("pool lock poisoned");
        if free.len() >= self.n_obj {
            return Err(Error::PoolDoubleReturn);
        }
        buf.fill(0);
        free.push(buf);
        Ok(())
    }

    /// Buffer size of this pool.
    pub fn obj_size(&self) -> usize {
        self.obj_size
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.free.lock().expect("pool lock poisoned").len()
    }

    /// Number of buffers currently held by consumers.
    pub fn outstanding(&self) -> usize {
        self.n_obj - self.available()
    }
}
