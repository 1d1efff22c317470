//! Transport abstraction: one write-only byte sink per link type.
//!
//! The engine streams over exactly one link at a time. Each backend
//! turns a device handle into a [`LinkSink`] or fails with a clean
//! [`StreamError::Acquisition`] leaving no partial state behind. The
//! wireless peer-to-peer link is the exception: its socket comes out
//! of negotiation (see [`crate::negotiate`]) and is only wrapped
//! here.

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::error::StreamError;

pub mod accessory;
pub mod lan;
pub mod p2p;
pub mod serial;

/// Which link carries the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Wired accessory endpoint (device node).
    Accessory,
    /// Radio serial profile (RFCOMM/SPP).
    Serial,
    /// Legacy LAN link (UDP discovery + TCP).
    Lan,
    /// Wireless peer-to-peer group.
    PeerToPeer,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Accessory => "accessory",
            TransportKind::Serial => "serial",
            TransportKind::Lan => "lan",
            TransportKind::PeerToPeer => "p2p",
        };
        f.write_str(name)
    }
}

/// Where to open a link. Carries everything a backend needs; the
/// peer-to-peer link has no handle because its endpoint is produced
/// by negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHandle {
    /// Path of the wired accessory's device node.
    Accessory { path: PathBuf },
    /// Remote radio address (colon-hex) and RFCOMM channel.
    Serial { addr: String, channel: u8 },
    /// A known host, or `None` to discover one by UDP broadcast.
    Lan { addr: Option<SocketAddr> },
}

impl DeviceHandle {
    pub fn kind(&self) -> TransportKind {
        match self {
            DeviceHandle::Accessory { .. } => TransportKind::Accessory,
            DeviceHandle::Serial { .. } => TransportKind::Serial,
            DeviceHandle::Lan { .. } => TransportKind::Lan,
        }
    }
}

/// The write half handed to the batching writer.
pub type LinkSink = Box<dyn AsyncWrite + Unpin + Send>;

/// One openable link backend.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the link and return its write sink. Must either succeed
    /// or fail cleanly with no partial state.
    async fn open(&self) -> Result<LinkSink, StreamError>;
}

/// Open the backend matching a device handle.
pub async fn open_transport(handle: &DeviceHandle) -> Result<LinkSink, StreamError> {
    debug!(kind = %handle.kind(), "opening transport");
    match handle {
        DeviceHandle::Accessory { path } => {
            accessory::AccessoryTransport::new(path.clone()).open().await
        }
        DeviceHandle::Serial { addr, channel } => {
            serial::SerialTransport::new(addr.clone(), *channel).open().await
        }
        DeviceHandle::Lan { addr } => lan::LanTransport::new(*addr).open().await,
    }
}

/// Best-effort scheduling boost for I/O worker threads.
///
/// Intended for a runtime builder's `on_thread_start`; failure (no
/// privilege, non-unix target) is silent and harmless.
pub fn boost_io_thread_priority() {
    #[cfg(unix)]
    // SAFETY: nice(2) takes no pointers and only affects the calling
    // thread's scheduling.
    unsafe {
        libc::nice(-10);
    }
}
