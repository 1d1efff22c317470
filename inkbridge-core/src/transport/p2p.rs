//! Wireless peer-to-peer data link.
//!
//! The socket itself comes out of [`crate::negotiate`] — group
//! formation, beaconing and the scan all happen there. This module
//! only finishes the job: disable Nagle so every batch leaves the
//! radio immediately, and hand the stream to the writer as a sink.

use tokio::net::TcpStream;
use tracing::info;

use crate::error::StreamError;

use super::LinkSink;

/// Turn a negotiated peer connection into a writer sink.
pub fn sink_from_stream(stream: TcpStream) -> Result<LinkSink, StreamError> {
    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        info!(peer = %peer, "p2p link ready");
    }
    Ok(Box::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn negotiated_stream_becomes_a_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            peer.read_exact(&mut buf).await.unwrap();
            buf
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut sink = sink_from_stream(stream).unwrap();
        sink.write_all(b"ok").await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ok");
    }
}
