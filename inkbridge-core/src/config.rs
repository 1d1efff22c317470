//! Engine configuration.
//!
//! Plain serde structs with defaults matching the tuned constants,
//! so an empty or missing file yields a working engine. The operator
//! binary loads the TOML; the library only consumes the struct.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffer::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Suppress single-finger input (palm rejection for pen work).
    /// Multi-finger gestures always pass.
    pub stylus_only: bool,
    pub buffer: BufferConfig,
    pub writer: WriterConfig,
    pub negotiation: NegotiationConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Outbound queue depth in frames.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriterConfig {
    /// Idle interval before a heartbeat goes out, in milliseconds.
    pub poll_timeout_ms: u64,
}

/// Bounds for the wireless peer negotiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NegotiationConfig {
    pub probe_timeout_ms: u64,
    pub probe_pool: usize,
    pub beacon_interval_ms: u64,
    pub beacon_window_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stylus_only: false,
            buffer: BufferConfig::default(),
            writer: WriterConfig::default(),
            negotiation: NegotiationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        use crate::negotiate::{BEACON_INTERVAL, BEACON_WINDOW, PROBE_POOL, PROBE_TIMEOUT};
        Self {
            probe_timeout_ms: PROBE_TIMEOUT.as_millis() as u64,
            probe_pool: PROBE_POOL,
            beacon_interval_ms: BEACON_INTERVAL.as_millis() as u64,
            beacon_window_secs: BEACON_WINDOW.as_secs(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: crate::writer::DEFAULT_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    /// Load from a TOML file, falling back to defaults when the file
    /// is missing or malformed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %path.display(), error = %err,
                          "config file malformed, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.writer.poll_timeout_ms)
    }
}
