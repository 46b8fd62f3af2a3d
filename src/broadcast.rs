//! Per-session fan-out from the single drain producer to attached viewers.
//!
//! The broadcaster owns the session's replay buffer so that a viewer's
//! backfill snapshot and its registration happen atomically relative to
//! `broadcast`: the snapshot is exactly the buffer contents at the attach
//! instant, followed by every chunk produced afterwards, in order, with no
//! duplication and no gaps.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::ring::ReplayBuffer;

/// Default bound on a viewer's undelivered chunk backlog. A viewer that
/// falls further behind is forcibly detached rather than backpressuring the
/// producer, which would stall every other viewer of the session.
pub const DEFAULT_VIEWER_BACKLOG: usize = 32;

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Mutex<BroadcasterInner>>,
}

struct BroadcasterInner {
    buffer: ReplayBuffer,
    viewers: HashMap<u64, mpsc::Sender<Bytes>>,
    next_handle: u64,
    backlog: usize,
    closed: bool,
}

/// Detach handle returned from [`Broadcaster::attach`]. Detaching is
/// idempotent and also happens on drop, so a viewer whose connection failed
/// mid-stream is cleaned up without an explicit call.
pub struct AttachHandle {
    id: u64,
    inner: Arc<Mutex<BroadcasterInner>>,
}

impl AttachHandle {
    /// Remove the viewer. Safe to call more than once and after the
    /// viewer's receiving side has already gone away.
    pub fn detach(&self) {
        self.inner.lock().viewers.remove(&self.id);
    }
}

impl Drop for AttachHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Broadcaster {
    pub fn new(buffer: ReplayBuffer, backlog: usize) -> Self {
        assert!(backlog > 0, "viewer backlog must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(BroadcasterInner {
                buffer,
                viewers: HashMap::new(),
                next_handle: 0,
                backlog,
                closed: false,
            })),
        }
    }

    /// Register a new viewer.
    ///
    /// The returned receiver first yields the replay-buffer snapshot taken
    /// at this instant (if any output has been produced), then live chunks.
    /// When the session ends or the viewer is evicted as slow, the channel
    /// closes after the already-queued chunks are drained.
    pub fn attach(&self) -> (AttachHandle, mpsc::Receiver<Bytes>) {
        let mut inner = self.inner.lock();
        let (tx, rx) = mpsc::channel(inner.backlog);

        // The backfill snapshot is delivered as one chunk and counts
        // against the viewer's backlog like any other.
        let backfill = inner.buffer.snapshot();
        if !backfill.is_empty() {
            let _ = tx.try_send(backfill);
        }

        let id = inner.next_handle;
        inner.next_handle += 1;
        if !inner.closed {
            inner.viewers.insert(id, tx);
        }
        // A closed broadcaster still serves the backfill: `tx` is dropped
        // here, so the receiver yields the snapshot then end-of-stream.

        (
            AttachHandle {
                id,
                inner: Arc::clone(&self.inner),
            },
            rx,
        )
    }

    /// Record a chunk in the replay buffer and deliver it to every attached
    /// viewer. Never blocks on a viewer: one whose queue is full is
    /// detached on the spot.
    pub fn broadcast(&self, data: Bytes) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.buffer.write(&data);

        let mut evicted = Vec::new();
        for (&id, tx) in inner.viewers.iter() {
            match tx.try_send(data.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(viewer = id, "viewer backlog exceeded, evicting");
                    evicted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver dropped without detaching.
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            inner.viewers.remove(&id);
        }
    }

    /// Stop accepting output and drop all viewer queues. Viewers observe
    /// end-of-stream once they drain what was already queued. Buffered
    /// bytes remain readable by late attaches until the session record is
    /// removed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.viewers.clear();
    }

    /// Number of currently attached viewers.
    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    /// Snapshot of the replay buffer, for callers that only want the tail.
    pub fn replay(&self) -> Bytes {
        self.inner.lock().buffer.snapshot()
    }
}
