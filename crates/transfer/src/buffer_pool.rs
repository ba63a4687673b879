//! Bounded cache of reusable chunk buffers.
//!
//! The reader takes buffers out of the pool and the upload stage hands them
//! back once a part has been sent. The pool is a cache, not a limiter:
//! `acquire` allocates when the pool is empty and `release` drops the buffer
//! when the pool is full, so neither call ever blocks. Steady-state memory is
//! roughly `capacity * buffer_size` plus whatever sits in the stage queues.

use crossbeam_queue::ArrayQueue;

/// Lock-free pool of equally sized byte buffers.
pub struct BufferPool {
    pool: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Creates an empty pool holding at most `capacity` buffers of
    /// `buffer_size` bytes. Buffers are allocated lazily on first `acquire`.
    ///
    /// A `capacity` of 0 is raised to 1.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            pool: ArrayQueue::new(capacity.max(1)),
            buffer_size,
        }
    }

    /// Returns a pooled buffer, or a freshly allocated one if the pool is empty.
    ///
    /// The buffer is always exactly `buffer_size` bytes long. Its contents are
    /// whatever the previous owner left behind.
    pub fn acquire(&self) -> Vec<u8> {
        self.pool
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    /// Offers a buffer back to the pool.
    ///
    /// Returns `false` when the buffer was dropped instead, either because the
    /// pool is at capacity or because the buffer is not `buffer_size` long.
    pub fn release(&self, buffer: Vec<u8>) -> bool {
        if buffer.len() != self.buffer_size {
            return false;
        }
        self.pool.push(buffer).is_ok()
    }

    /// Number of buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }

    /// Maximum number of idle buffers the pool retains.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Size in bytes of every buffer handed out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
