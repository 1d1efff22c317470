//! Bounded outbound buffer between the sample producer and the
//! batching writer.
//!
//! The producer side is synchronous and never blocks: when the
//! buffer is full the newest frame is dropped, because a stale input
//! sample is worthless once it has aged past the buffering window.
//! The writer side drains everything queued in one atomic operation.
//! The lock is held only around the check-and-mutate step, never
//! across I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default capacity in frames: roughly 100 ms of traffic at expected
/// pad input rates.
pub const DEFAULT_CAPACITY: usize = 12;

/// Bounded FIFO of already-serialized frames.
pub struct OutboundBuffer {
    queue: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue one serialized frame.
    ///
    /// Never blocks. Returns `false` (and drops the frame silently)
    /// when the buffer is at capacity.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        {
            let mut queue = self.queue.lock().expect("buffer lock poisoned");
            if queue.len() >= self.capacity {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Atomically remove and return everything currently queued, in
    /// arrival order.
    pub fn drain_all(&self) -> Vec<Bytes> {
        let mut queue = self.queue.lock().expect("buffer lock poisoned");
        queue.drain(..).collect()
    }

    /// Wait until at least one frame is queued, up to `timeout`.
    ///
    /// Returns `true` when data is available, `false` on timeout with
    /// the buffer still empty.
    pub async fn wait_for_frame(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before the emptiness check so an
            // enqueue between the two cannot be missed.
            let notified = self.notify.notified();
            if !self.is_empty() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return !self.is_empty();
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return !self.is_empty();
            }
        }
    }

    /// Discard all queued frames.
    pub fn clear(&self) {
        let mut queue = self.queue.lock().expect("buffer lock poisoned");
        queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped due to backpressure since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ── Tests ────────────────────────────────────────────────────────
