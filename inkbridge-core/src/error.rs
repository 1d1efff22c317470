//! Domain-specific error types for the streaming engine.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Low-level I/O faults inside the writer loop never cross the
//! producer boundary as errors — they are converted into a session
//! state transition at the point of occurrence.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming engine.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Acquisition ──────────────────────────────────────────────
    /// Opening a transport handle was denied or the hardware is
    /// absent. Non-fatal; the caller may retry with another device.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// The requested link is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    // ── Transport I/O ────────────────────────────────────────────
    /// The underlying write or negotiation I/O failed mid-stream.
    /// Fatal to the current session.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Negotiation ──────────────────────────────────────────────
    /// Bounded retries exhausted while negotiating the peer link.
    #[error("negotiation timed out: {what} ({attempts} attempts)")]
    NegotiationTimeout { what: &'static str, attempts: u32 },

    /// A lifecycle or negotiation state transition was not valid
    /// from the current state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Protocol ─────────────────────────────────────────────────
    /// Received or constructed bytes that do not form a valid frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// An internal event channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

impl StreamError {
    /// Whether the session owner may simply retry `connect` after
    /// this error (as opposed to a fault that ended a live stream).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::Acquisition(_) | StreamError::NegotiationTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::Acquisition("permission denied".into());
        assert!(e.to_string().contains("permission denied"));

        let e = StreamError::NegotiationTimeout {
            what: "group credentials",
            attempts: 5,
        };
        assert!(e.to_string().contains("group credentials"));
        assert!(e.to_string().contains('5'));
    }

    #[test]
    fn from_string() {
        let e: StreamError = "something broke".into();
        assert!(matches!(e, StreamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StreamError = io_err.into();
        assert!(matches!(e, StreamError::Io(_)));
    }

    #[test]
    fn retryable_classification() {
        assert!(StreamError::Acquisition("no device".into()).is_retryable());
        assert!(!StreamError::ChannelClosed.is_retryable());
    }
}
