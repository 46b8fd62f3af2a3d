use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// Default replay capacity applied to every session's buffer.
pub const DEFAULT_REPLAY_CAPACITY: usize = 8192;

/// Fixed-capacity byte ring that retains the most recent output of a session.
///
/// A newly attached viewer is backfilled from a [`snapshot`](Self::snapshot)
/// before live streaming begins. Writes never fail and never block: once the
/// capacity is exceeded the oldest retained bytes are overwritten.
///
/// The buffer is written by a single producer (the session's drain task) and
/// snapshotted by any number of readers. Both sides take a short mutex, so a
/// reader can only hold up the producer for the duration of one copy.
#[derive(Clone)]
pub struct ReplayBuffer {
    inner: Arc<Mutex<RingInner>>,
}

struct RingInner {
    buf: Vec<u8>,
    capacity: usize,
    /// Next write position, modulo `capacity`.
    head: usize,
    /// Number of valid bytes (saturates at `capacity`).
    len: usize,
}

impl ReplayBuffer {
    /// Create a buffer with the given capacity. The capacity is fixed for
    /// the lifetime of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(RingInner {
                buf: vec![0; capacity],
                capacity,
                head: 0,
                len: 0,
            })),
        }
    }

    /// Append bytes, overwriting the oldest retained bytes once the capacity
    /// is exceeded. Chunks larger than the capacity keep only their suffix.
    pub fn write(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;

        // Only the suffix of an oversized chunk can ever be retained.
        let data = if data.len() > capacity {
            &data[data.len() - capacity..]
        } else {
            data
        };

        // At most two slice copies: up to the wrap point, then the rest
        // from the start. Keeps the critical section one memcpy long.
        let head = inner.head;
        let first = data.len().min(capacity - head);
        inner.buf[head..head + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            inner.buf[..rest].copy_from_slice(&data[first..]);
        }
        inner.head = (head + data.len()) % capacity;
        inner.len = (inner.len + data.len()).min(capacity);
    }

    /// Copy of the currently retained bytes, in write order.
    pub fn snapshot(&self) -> Bytes {
        let inner = self.inner.lock();
        if inner.len == 0 {
            return Bytes::new();
        }
        let start = (inner.head + inner.capacity - inner.len) % inner.capacity;
        let mut out = Vec::with_capacity(inner.len);
        if start + inner.len <= inner.capacity {
            out.extend_from_slice(&inner.buf[start..start + inner.len]);
        } else {
            out.extend_from_slice(&inner.buf[start..]);
            out.extend_from_slice(&inner.buf[..inner.head]);
        }
        Bytes::from(out)
    }

    /// Number of currently retained bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity this buffer was created with.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}
