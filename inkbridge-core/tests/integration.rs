//! End-to-end tests over real localhost sockets: engine → transport
//! → receiver, covering the lifecycle paths a desktop session hits.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};

use inkbridge_core::constants::{GROUP_NAME, GROUP_PASSPHRASE};
use inkbridge_core::frame::{is_heartbeat, PEN_FRAME_LEN};
use inkbridge_core::negotiate::{GroupCredentials, GroupInfo, GroupProvisioner, Negotiator, ScanPlan};
use inkbridge_core::{
    DeviceHandle, PenFrame, Pointer, PointerAction, PointerSample, SessionEvent, SessionState,
    StreamConfig, StreamEngine, StreamError, SurfaceSize, TransportKind,
};

const SURFACE: SurfaceSize = SurfaceSize { width: 1920.0, height: 1080.0 };

fn stylus_sample(x: f32) -> PointerSample {
    PointerSample::new(PointerAction::Move, vec![Pointer::stylus(x, 540.0, 0.5)])
}

fn finger_sample(x: f32) -> PointerSample {
    PointerSample::new(PointerAction::Move, vec![Pointer::finger(0, x, 540.0)])
}

async fn ephemeral_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn expect_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Read frames off the peer socket until `count` pen frames (not
/// heartbeats) have arrived.
async fn read_pen_frames(peer: &mut TcpStream, count: usize) -> Vec<PenFrame> {
    let mut frames = Vec::new();
    let mut buf = [0u8; PEN_FRAME_LEN];
    while frames.len() < count {
        tokio::time::timeout(Duration::from_secs(5), peer.read_exact(&mut buf))
            .await
            .expect("timed out reading frame")
            .unwrap();
        if is_heartbeat(&buf) {
            continue;
        }
        frames.push(PenFrame::decode(&buf).unwrap());
    }
    frames
}

#[tokio::test]
async fn lan_session_streams_frames_in_order() {
    let (listener, addr) = ephemeral_listener().await;
    let (engine, mut events) = StreamEngine::new(StreamConfig::default());

    engine
        .connect(DeviceHandle::Lan { addr: Some(addr) })
        .await
        .unwrap();
    assert_eq!(engine.state(), SessionState::Streaming);
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Connected(TransportKind::Lan)
    );

    let (mut peer, _) = listener.accept().await.unwrap();
    for i in 1..=5 {
        assert!(engine.forward(&stylus_sample(i as f32 * 100.0), SURFACE));
    }

    let frames = read_pen_frames(&mut peer, 5).await;
    let xs: Vec<i32> = frames.iter().map(|f| f.x).collect();
    let mut sorted = xs.clone();
    sorted.sort_unstable();
    assert_eq!(xs, sorted, "frames arrived out of order: {xs:?}");
    assert!(xs.windows(2).all(|w| w[0] < w[1]));

    engine.close().await;
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected { reason: None }
    );
}

#[tokio::test]
async fn idle_session_heartbeats() {
    let (listener, addr) = ephemeral_listener().await;
    let (engine, _events) = StreamEngine::new(StreamConfig::default());
    engine
        .connect(DeviceHandle::Lan { addr: Some(addr) })
        .await
        .unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; PEN_FRAME_LEN];
    peer.read_exact(&mut buf).await.unwrap();
    assert!(is_heartbeat(&buf));

    engine.close().await;
}

#[tokio::test]
async fn stylus_only_session_sends_no_finger_data() {
    let (listener, addr) = ephemeral_listener().await;
    let config = StreamConfig { stylus_only: true, ..StreamConfig::default() };
    let (engine, _events) = StreamEngine::new(config);
    engine
        .connect(DeviceHandle::Lan { addr: Some(addr) })
        .await
        .unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    for i in 0..10 {
        // Consumed, not transmitted.
        assert!(engine.forward(&finger_sample(i as f32 * 10.0), SURFACE));
    }

    // Everything on the wire is heartbeat traffic.
    let mut buf = [0u8; PEN_FRAME_LEN];
    for _ in 0..3 {
        peer.read_exact(&mut buf).await.unwrap();
        assert!(is_heartbeat(&buf), "finger data leaked in stylus-only mode");
    }

    engine.close().await;
}

#[tokio::test]
async fn reconnect_tears_down_the_previous_session() {
    let (first_listener, first_addr) = ephemeral_listener().await;
    let (second_listener, second_addr) = ephemeral_listener().await;
    let (engine, _events) = StreamEngine::new(StreamConfig::default());

    engine
        .connect(DeviceHandle::Lan { addr: Some(first_addr) })
        .await
        .unwrap();
    let (mut first_peer, _) = first_listener.accept().await.unwrap();

    engine
        .connect(DeviceHandle::Lan { addr: Some(second_addr) })
        .await
        .unwrap();
    let (mut second_peer, _) = second_listener.accept().await.unwrap();

    // The first link is shut down: its reader reaches EOF.
    let mut sink = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), first_peer.read_to_end(&mut sink))
        .await
        .expect("first link not torn down")
        .unwrap();

    // The second link carries the stream.
    engine.forward(&stylus_sample(500.0), SURFACE);
    let frames = read_pen_frames(&mut second_peer, 1).await;
    assert_eq!(frames.len(), 1);

    engine.close().await;
}

#[tokio::test]
async fn double_close_is_safe_and_emits_one_disconnect() {
    let (listener, addr) = ephemeral_listener().await;
    let (engine, mut events) = StreamEngine::new(StreamConfig::default());
    engine
        .connect(DeviceHandle::Lan { addr: Some(addr) })
        .await
        .unwrap();
    let _peer = listener.accept().await.unwrap();
    assert!(matches!(expect_event(&mut events).await, SessionEvent::Connected(_)));

    engine.close().await;
    engine.close().await;
    assert_eq!(engine.state(), SessionState::Disconnected);

    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected { reason: None }
    );
    // Nothing further queued.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn dead_link_surfaces_a_fault_and_silences_forward() {
    let (listener, addr) = ephemeral_listener().await;
    let (engine, mut events) = StreamEngine::new(StreamConfig::default());
    engine
        .connect(DeviceHandle::Lan { addr: Some(addr) })
        .await
        .unwrap();
    assert!(matches!(expect_event(&mut events).await, SessionEvent::Connected(_)));

    // Receiver goes away; heartbeats keep probing the link until a
    // write faults.
    let (peer, _) = listener.accept().await.unwrap();
    drop(peer);

    loop {
        match expect_event(&mut events).await {
            SessionEvent::Disconnected { reason } => {
                assert!(reason.is_some(), "fault must carry a reason");
                break;
            }
            other => panic!("unexpected event before fault: {other:?}"),
        }
    }
    assert_eq!(engine.state(), SessionState::Disconnected);
    assert!(!engine.forward(&stylus_sample(100.0), SURFACE));
}

// ── Wireless peer-to-peer flow ───────────────────────────────────

struct InstantProvisioner;

#[async_trait]
impl GroupProvisioner for InstantProvisioner {
    async fn remove_group(&self) -> Result<(), StreamError> {
        Ok(())
    }

    async fn request_group(&self, _: &str, _: &str) -> Result<(), StreamError> {
        Ok(())
    }

    async fn group_info(&self) -> Result<Option<GroupInfo>, StreamError> {
        Ok(Some(GroupInfo {
            credentials: GroupCredentials {
                name: GROUP_NAME.into(),
                passphrase: GROUP_PASSPHRASE.into(),
            },
            owner_addr: "127.0.0.1".parse().unwrap(),
        }))
    }
}

#[tokio::test]
async fn p2p_session_end_to_end() {
    // The "peer": a beacon receiver plus a data listener.
    let beacon_rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let beacon_addr = beacon_rx.local_addr().unwrap();
    let (data_listener, data_addr) = ephemeral_listener().await;

    let mut negotiator = Negotiator::new(InstantProvisioner)
        .with_beacon_dest(beacon_addr)
        .with_beacon_timing(Duration::from_millis(10), Duration::from_secs(10))
        .with_scan_plan(ScanPlan {
            candidates: vec![data_addr],
            probe_timeout: Duration::from_millis(300),
            max_in_flight: 8,
        });

    let (joined_tx, joined_rx) = oneshot::channel();
    let (engine, mut events) = StreamEngine::new(StreamConfig::default());

    let peer = tokio::spawn(async move {
        // Receive the credential beacon, then "join" and accept.
        let mut buf = [0u8; 128];
        let (len, _) = beacon_rx.recv_from(&mut buf).await.unwrap();
        let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
        joined_tx.send(()).unwrap();
        let (stream, _) = data_listener.accept().await.unwrap();
        (payload, stream)
    });

    engine.connect_p2p(&mut negotiator, joined_rx).await.unwrap();
    let (payload, mut stream) = peer.await.unwrap();
    assert_eq!(payload, format!("INKBRIDGE_P2P:{GROUP_NAME}:{GROUP_PASSPHRASE}"));

    // Events: phase updates, credentials, then connected.
    assert!(matches!(expect_event(&mut events).await, SessionEvent::Negotiating(_)));
    let creds = expect_event(&mut events).await;
    match creds {
        SessionEvent::CredentialsReady(creds) => {
            assert_eq!(creds.name, GROUP_NAME);
            assert_eq!(creds.passphrase, GROUP_PASSPHRASE);
        }
        other => panic!("expected credentials, got {other:?}"),
    }
    assert!(matches!(expect_event(&mut events).await, SessionEvent::Negotiating(_)));
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Connected(TransportKind::PeerToPeer)
    );

    engine.forward(&stylus_sample(960.0), SURFACE);
    let frames = read_pen_frames(&mut stream, 1).await;
    assert_eq!(frames[0].x, 16383);

    engine.close().await;
}
