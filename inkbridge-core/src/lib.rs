//! InkBridge streaming engine.
//!
//! Turns a handheld touch/stylus surface into a live input device
//! for a desktop receiver: pointer samples are normalized into a
//! compact binary protocol and streamed, latency first, over one of
//! three links — a wired accessory endpoint, a radio serial channel,
//! or a wireless peer-to-peer group.
//!
//! The pipeline is producer → buffer → writer:
//!
//! ```text
//! input surface ──► EventEncoder ──► OutboundBuffer ──► BatchWriter ──► LinkSink
//!                   (normalize,       (bounded,          (batch,
//!                    route)            drop on full)      heartbeat)
//! ```
//!
//! The producer side never blocks: a slow link costs dropped frames,
//! not input latency. [`session::StreamEngine`] owns the lifecycle;
//! the wireless link additionally runs [`negotiate::Negotiator`]
//! before it has a socket to stream over.

pub mod buffer;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod negotiate;
pub mod pointer;
pub mod session;
pub mod transport;
pub mod writer;

pub use buffer::OutboundBuffer;
pub use config::StreamConfig;
pub use encoder::EventEncoder;
pub use error::StreamError;
pub use frame::{PenFrame, TouchFrame, TouchSlot};
pub use negotiate::{GroupCredentials, GroupProvisioner, NegotiationPhase, Negotiator, ScanPlan};
pub use pointer::{Pointer, PointerAction, PointerSample, SurfaceSize, ToolClass};
pub use session::{SessionEvent, SessionState, StreamEngine};
pub use transport::{DeviceHandle, LinkSink, Transport, TransportKind};
pub use writer::BatchWriter;

/// Protocol-level constants shared across link types.
pub mod constants {
    /// TCP port of the receiver's data listener (LAN and P2P).
    pub const DATA_PORT: u16 = 4545;
    /// UDP port answering LAN discovery broadcasts.
    pub const DISCOVERY_PORT: u16 = 4546;
    /// UDP port the P2P credential beacon is sent to.
    pub const BEACON_PORT: u16 = 4547;

    /// LAN discovery request and expected reply payloads.
    pub const DISCOVERY_REQUEST: &str = "INKBRIDGE_DISCOVER";
    pub const DISCOVERY_REPLY: &str = "I_AM_INKBRIDGE";

    /// Prefix of the P2P credential beacon payload.
    pub const BEACON_PREFIX: &str = "INKBRIDGE_P2P:";

    /// Requested wireless group identity. The platform may assign a
    /// different name; the beacon always carries the actual one.
    pub const GROUP_NAME: &str = "DIRECT-IB-InkBridge";
    pub const GROUP_PASSPHRASE: &str = "inkbridge2024";

    /// Address space the platform assigns to group members.
    pub const P2P_SUBNET: [u8; 3] = [192, 168, 49];
    pub const P2P_HOST_FIRST: u8 = 2;
    pub const P2P_HOST_LAST: u8 = 20;
}
