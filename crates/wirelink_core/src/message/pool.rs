use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SocketError;

/// A fixed-size buffer owned by the pool, identified by its slot index.
struct Slot {
    index: Option<usize>,
    data: Box<[u8]>,
}

struct PoolInner {
    buffer_size: usize,
    capacity: usize,
    free: Mutex<Vec<Slot>>,
}

/// An arena of fixed-size message buffers.
///
/// Buffers are checked out with [`BufferPool::acquire`] and go back to their
/// slot when the [`PooledBuffer`] is dropped. When every slot is checked out an
/// unpooled buffer of the same size is handed out and freed on drop.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let free = (0..capacity)
            .rev()
            .map(|index| Slot {
                index: Some(index),
                data: vec![0; buffer_size].into_boxed_slice(),
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                capacity,
                free: Mutex::new(free),
            }),
        }
    }

    /// Check out a buffer.
    pub fn acquire(&self) -> PooledBuffer {
        let slot = self.inner.free.lock().pop().unwrap_or_else(|| Slot {
            index: None,
            data: vec![0; self.inner.buffer_size].into_boxed_slice(),
        });

        PooledBuffer {
            pool: Arc::clone(&self.inner),
            slot: Some(slot),
            len: 0,
        }
    }

    /// Number of pooled buffers currently available.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("buffer_size", &self.inner.buffer_size)
            .field("available", &self.available())
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`]. Returned to its slot on drop.
pub struct PooledBuffer {
    pool: Arc<PoolInner>,
    // Only `None` while dropping
    slot: Option<Slot>,
    len: usize,
}

impl PooledBuffer {
    /// Replace the buffer contents with a complete frame.
    pub fn fill(&mut self, frame: &[u8]) -> Result<(), SocketError> {
        let Some(slot) = self.slot.as_mut() else {
            return Err(SocketError::Closed);
        };
        if frame.len() > slot.data.len() {
            return Err(SocketError::FrameTooLarge {
                len: frame.len(),
                capacity: slot.data.len(),
            });
        }
        slot.data[..frame.len()].copy_from_slice(frame);
        self.len = frame.len();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot index, or `None` for an unpooled overflow buffer.
    pub fn slot(&self) -> Option<usize> {
        self.slot.as_ref().and_then(|slot| slot.index)
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        match &self.slot {
            Some(slot) => &slot.data[..self.len],
            None => &[],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take()
            && slot.index.is_some()
        {
            self.pool.free.lock().push(slot);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("slot", &self.slot())
            .field("len", &self.len)
            .finish()
    }
}
