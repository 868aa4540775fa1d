//! Buffer pool handle.
//!
//! The pool is the only resource a connection shares with other threads, so
//! it is `Send + Sync`. Connections take buffers with scoped
//! acquire → use → release through [`PooledBuffer`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender};

use crate::metrics;

/// A source of reusable byte buffers.
pub trait BufferPool: Send + Sync {
    /// Take a buffer. Its length is zero and its capacity is at least
    /// [`buffer_size`](Self::buffer_size).
    fn acquire(&self) -> BytesMut;

    /// Give a buffer back.
    fn release(&self, buf: BytesMut);

    /// Capacity of the buffers this pool hands out.
    fn buffer_size(&self) -> usize;
}

/// A buffer on loan from a pool, returned when dropped.
pub struct PooledBuffer {
    pool: Arc<dyn BufferPool>,
    buf: BytesMut,
}

impl PooledBuffer {
    pub fn acquire(pool: &Arc<dyn BufferPool>) -> Self {
        Self {
            buf: pool.acquire(),
            pool: pool.clone(),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.pool.release(buf);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}

/// A bounded free list of equally sized buffers.
///
/// `acquire` allocates when the list is empty; `release` drops the buffer
/// when the list is full or the buffer shrank below the pool's size.
pub struct FixedBufferPool {
    buffer_size: usize,
    tx: Sender<BytesMut>,
    rx: Receiver<BytesMut>,
}

impl FixedBufferPool {
    /// Create a pool holding up to `capacity` idle buffers of `buffer_size` bytes.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            buffer_size,
            tx,
            rx,
        }
    }

    /// Like [`new`](Self::new), with the free list filled up front.
    pub fn with_prealloc(capacity: usize, buffer_size: usize) -> Self {
        let pool = Self::new(capacity, buffer_size);
        for _ in 0..capacity {
            // Cannot fail: the channel has exactly `capacity` slots.
            let _ = pool.tx.try_send(BytesMut::with_capacity(buffer_size));
        }
        pool
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.rx.len()
    }
}

impl BufferPool for FixedBufferPool {
    fn acquire(&self) -> BytesMut {
        match self.rx.try_recv() {
            Ok(buf) => buf,
            Err(_) => {
                metrics::POOL_ALLOCATED.increment();
                BytesMut::with_capacity(self.buffer_size)
            }
        }
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < self.buffer_size {
            return;
        }
        if self.tx.try_send(buf).is_err() {
            metrics::POOL_DISCARDED.increment();
        }
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl fmt::Debug for FixedBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("idle", &self.idle())
            .finish()
    }
}
