//! Batching writer: single consumer of the outbound buffer.
//!
//! One loop iteration = one bounded wait, one drain, one write. All
//! frames pending at wake-up are concatenated and flushed with a
//! single `write_all`, so a burst costs one syscall instead of one
//! per frame. When a full poll interval passes with nothing queued a
//! heartbeat frame goes out instead, keeping the link warm and
//! letting the receiver detect a dead transport.
//!
//! A write failure is fatal to the session: the loop clears the
//! running flag and returns the error, never retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::buffer::OutboundBuffer;
use crate::error::StreamError;
use crate::frame::heartbeat_frame;

/// How long one iteration waits for data before sending a heartbeat.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Drains the outbound buffer into one transport sink.
pub struct BatchWriter<S> {
    sink: S,
    buffer: Arc<OutboundBuffer>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl<S: AsyncWrite + Unpin + Send> BatchWriter<S> {
    pub fn new(sink: S, buffer: Arc<OutboundBuffer>, running: Arc<AtomicBool>) -> Self {
        Self {
            sink,
            buffer,
            running,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Run until the running flag clears or the sink fails.
    ///
    /// On a clean stop the sink is shut down and `Ok(())` returned;
    /// on a write fault the flag is cleared here and the error
    /// propagated so the session can record the disconnect reason.
    pub async fn run(mut self) -> Result<(), StreamError> {
        debug!(poll_ms = self.poll_timeout.as_millis() as u64, "writer loop started");

        while self.running.load(Ordering::SeqCst) {
            let has_data = self.buffer.wait_for_frame(self.poll_timeout).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let payload = if has_data {
                let frames = self.buffer.drain_all();
                if frames.is_empty() {
                    // Raced with a teardown clear.
                    continue;
                }
                trace!(frames = frames.len(), "flushing batch");
                let total: usize = frames.iter().map(|f| f.len()).sum();
                let mut batch = BytesMut::with_capacity(total);
                for frame in &frames {
                    batch.extend_from_slice(frame);
                }
                batch.freeze()
            } else {
                trace!("idle interval, sending heartbeat");
                heartbeat_frame()
            };

            if let Err(err) = self.write_payload(&payload).await {
                self.running.store(false, Ordering::SeqCst);
                debug!(error = %err, "writer loop stopping on write fault");
                let _ = self.sink.shutdown().await;
                return Err(err.into());
            }
        }

        // Best effort: the link may already be gone.
        let _ = self.sink.shutdown().await;
        debug!("writer loop stopped");
        Ok(())
    }

    async fn write_payload(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.sink.write_all(payload).await?;
        self.sink.flush().await
    }
}

// ── Tests ────────────────────────────────────────────────────────
