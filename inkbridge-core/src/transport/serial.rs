//! Radio serial link (RFCOMM, serial-port profile).
//!
//! The remote side advertises the standard SPP service; we connect a
//! raw RFCOMM stream socket to its address and channel. An
//! authenticated link is tried first; pads paired before link-level
//! security was enforced fall back to an unauthenticated channel.
//!
//! Serial radio writes are expensive per call, so the sink is
//! wrapped in a buffer sized for a small burst of pen frames; the
//! batching writer's explicit flush pushes each batch out.
//!
//! Only the linux bluetooth stack is supported; elsewhere `open`
//! reports the link as unavailable.

use async_trait::async_trait;

use crate::error::StreamError;

use super::{LinkSink, Transport, TransportKind};

/// Standard serial-port-profile service class UUID, used when
/// resolving the remote channel from service discovery.
pub const SPP_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// Default RFCOMM channel when service discovery is skipped.
pub const DEFAULT_CHANNEL: u8 = 1;

/// Sink buffer: one burst worth of pen frames.
pub const SINK_BUFFER_SIZE: usize = 16 * crate::frame::PEN_FRAME_LEN;

pub struct SerialTransport {
    addr: String,
    channel: u8,
}

impl SerialTransport {
    pub fn new(addr: String, channel: u8) -> Self {
        Self { addr, channel }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    #[cfg(target_os = "linux")]
    async fn open(&self) -> Result<LinkSink, StreamError> {
        use tokio::io::BufWriter;
        use tracing::info;

        let addr = self.addr.clone();
        let channel = self.channel;
        let stream = tokio::task::spawn_blocking(move || platform::connect(&addr, channel))
            .await
            .map_err(|err| StreamError::Other(format!("serial connect task: {err}")))??;

        stream
            .set_nonblocking(true)
            .map_err(StreamError::Io)?;
        let stream = tokio::net::UnixStream::from_std(stream).map_err(StreamError::Io)?;
        info!(addr = %self.addr, channel = self.channel, "serial link connected");
        Ok(Box::new(BufWriter::with_capacity(SINK_BUFFER_SIZE, stream)))
    }

    #[cfg(not(target_os = "linux"))]
    async fn open(&self) -> Result<LinkSink, StreamError> {
        Err(StreamError::Unsupported("radio serial link (linux only)"))
    }
}

// ── Linux RFCOMM plumbing ────────────────────────────────────────

#[cfg(target_os = "linux")]
mod platform {
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::os::unix::net::UnixStream;

    use socket2::Socket;
    use tracing::debug;

    use crate::error::StreamError;

    const AF_BLUETOOTH: i32 = 31;
    const BTPROTO_RFCOMM: i32 = 3;
    const SOL_BLUETOOTH: i32 = 274;
    const BT_SECURITY: i32 = 4;
    const BT_SECURITY_MEDIUM: u8 = 2;

    /// struct sockaddr_rc from <bluetooth/rfcomm.h>.
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    /// Parse a colon-hex radio address into bdaddr_t byte order
    /// (least significant byte first).
    pub fn parse_bdaddr(addr: &str) -> Result<[u8; 6], StreamError> {
        let mut out = [0u8; 6];
        let mut parts = addr.split(':');
        for slot in out.iter_mut().rev() {
            let part = parts
                .next()
                .ok_or_else(|| StreamError::Acquisition(format!("bad radio address: {addr}")))?;
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| StreamError::Acquisition(format!("bad radio address: {addr}")))?;
        }
        if parts.next().is_some() {
            return Err(StreamError::Acquisition(format!("bad radio address: {addr}")));
        }
        Ok(out)
    }

    /// Connect, preferring an authenticated link.
    pub fn connect(addr: &str, channel: u8) -> Result<UnixStream, StreamError> {
        let bdaddr = parse_bdaddr(addr)?;
        match connect_once(bdaddr, channel, true) {
            Ok(stream) => Ok(stream),
            Err(secure_err) => {
                debug!(error = %secure_err, "secure channel failed, retrying insecure");
                connect_once(bdaddr, channel, false).map_err(|_| {
                    StreamError::Acquisition(format!("serial link {addr}: {secure_err}"))
                })
            }
        }
    }

    fn connect_once(bdaddr: [u8; 6], channel: u8, secure: bool) -> io::Result<UnixStream> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                BTPROTO_RFCOMM,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just created and is owned by nothing else.
        let socket = unsafe { Socket::from_raw_fd(fd) };

        if secure {
            // struct bt_security { level, key_size }
            let sec: [u8; 2] = [BT_SECURITY_MEDIUM, 0];
            let rc = unsafe {
                libc::setsockopt(
                    socket.as_raw_fd(),
                    SOL_BLUETOOTH,
                    BT_SECURITY,
                    sec.as_ptr().cast(),
                    sec.len() as libc::socklen_t,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        let sa = SockaddrRc {
            rc_family: AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: bdaddr,
            rc_channel: channel,
        };
        let rc = unsafe {
            libc::connect(
                socket.as_raw_fd(),
                (&sa as *const SockaddrRc).cast(),
                mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(socket.into())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_buffer_holds_sixteen_pen_frames() {
        assert_eq!(SINK_BUFFER_SIZE, 368);
    }

    #[cfg(not(target_os = "linux"))]
    #[tokio::test]
    async fn unsupported_off_linux() {
        let t = SerialTransport::new("AA:BB:CC:DD:EE:FF".into(), DEFAULT_CHANNEL);
        assert!(matches!(
            t.open().await.unwrap_err(),
            StreamError::Unsupported(_)
        ));
    }
}
