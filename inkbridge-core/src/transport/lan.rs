//! Legacy LAN link: find the desktop receiver by UDP broadcast,
//! then stream over a plain TCP connection to the data port.
//!
//! Discovery is a single-datagram handshake: we broadcast the
//! request string and any receiver answers with the reply string
//! from its own address. A known host can be supplied directly to
//! skip discovery entirely.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::constants::{DATA_PORT, DISCOVERY_PORT, DISCOVERY_REPLY, DISCOVERY_REQUEST};
use crate::error::StreamError;

use super::{LinkSink, Transport, TransportKind};

/// Deadline for the TCP connect to the data port.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long one discovery attempt waits for a reply.
const DISCOVERY_REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const DISCOVERY_ATTEMPTS: u32 = 3;

pub struct LanTransport {
    addr: Option<SocketAddr>,
    discovery_addr: SocketAddr,
}

impl LanTransport {
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self {
            addr,
            discovery_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT),
        }
    }

    /// Override the discovery destination (tests point this at
    /// localhost instead of the broadcast address).
    pub fn with_discovery_addr(mut self, addr: SocketAddr) -> Self {
        self.discovery_addr = addr;
        self
    }
}

#[async_trait]
impl Transport for LanTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Lan
    }

    async fn open(&self) -> Result<LinkSink, StreamError> {
        let target = match self.addr {
            Some(addr) => addr,
            None => discover(self.discovery_addr).await?,
        };

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target))
            .await
            .map_err(|_| {
                StreamError::Acquisition(format!("lan host {target}: connect timed out"))
            })?
            .map_err(|err| StreamError::Acquisition(format!("lan host {target}: {err}")))?;
        stream.set_nodelay(true)?;
        info!(host = %target, "lan link connected");
        Ok(Box::new(stream))
    }
}

/// Broadcast the discovery request and return the first receiver
/// that answers, at the fixed data port.
pub async fn discover(discovery_addr: SocketAddr) -> Result<SocketAddr, StreamError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let mut reply = [0u8; 64];
    for attempt in 1..=DISCOVERY_ATTEMPTS {
        debug!(attempt, to = %discovery_addr, "broadcasting discovery request");
        socket
            .send_to(DISCOVERY_REQUEST.as_bytes(), discovery_addr)
            .await?;

        match tokio::time::timeout(DISCOVERY_REPLY_TIMEOUT, socket.recv_from(&mut reply)).await {
            Ok(Ok((len, from))) if reply[..len] == *DISCOVERY_REPLY.as_bytes() => {
                debug!(host = %from.ip(), "receiver answered discovery");
                return Ok(SocketAddr::new(from.ip(), DATA_PORT));
            }
            Ok(Ok((_, from))) => {
                debug!(from = %from, "ignoring unrelated datagram");
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {}
        }
    }
    Err(StreamError::Acquisition(
        "no lan receiver answered discovery".into(),
    ))
}
