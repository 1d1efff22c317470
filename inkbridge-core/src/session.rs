//! Session lifecycle: one live link at a time.
//!
//! [`StreamEngine`] is the root object the surface layer talks to.
//! `connect` opens a transport (running peer negotiation first for
//! the wireless link), then starts the writer task; `forward` is the
//! producer entry point and never blocks; `close` is idempotent and
//! safe under concurrent callers. A prior session is always torn
//! down before a new connect proceeds, so a double connect can never
//! leak a writer task or a socket.
//!
//! Status reaches the owner through the [`SessionEvent`] channel
//! rather than callbacks, so the UI layer can consume it from
//! whatever context it likes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::OutboundBuffer;
use crate::config::StreamConfig;
use crate::encoder::EventEncoder;
use crate::error::StreamError;
use crate::negotiate::{GroupCredentials, GroupProvisioner, Negotiator};
use crate::pointer::{PointerSample, SurfaceSize};
use crate::transport::{open_transport, p2p, DeviceHandle, LinkSink, TransportKind};
use crate::writer::BatchWriter;

/// How long `close` waits for the writer task before aborting it.
pub const CLOSE_JOIN_DEADLINE: Duration = Duration::from_secs(1);

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of the single streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Transport opening (and, for the wireless link, negotiating).
    Connecting,
    /// Writer task live, frames flowing.
    Streaming,
    /// Teardown in progress.
    Closing,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Streaming) => true,
            // Failed connect, writer fault, or orderly teardown.
            (Connecting | Streaming, Disconnected) => true,
            (Connecting | Streaming, Closing) => true,
            (Closing, Disconnected) => true,
            _ => false,
        }
    }
}

// ── SessionEvent ─────────────────────────────────────────────────

/// Status notifications for the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(TransportKind),
    /// The session ended. `reason` is set when a fault (not an
    /// orderly close) ended it.
    Disconnected { reason: Option<String> },
    /// Wireless negotiation moved to a new phase.
    Negotiating(crate::negotiate::NegotiationPhase),
    /// Group formed; show these to the operator so the receiver can
    /// join.
    CredentialsReady(GroupCredentials),
    /// A connect attempt failed before streaming started.
    Failed(String),
}

// ── StreamEngine ─────────────────────────────────────────────────

struct ActiveSession {
    kind: TransportKind,
    running: Arc<AtomicBool>,
    buffer: Arc<OutboundBuffer>,
    writer: JoinHandle<()>,
}

/// Producer-side handle: checked on every `forward` without any
/// async machinery.
struct ProducerSlot {
    encoder: EventEncoder,
    running: Arc<AtomicBool>,
}

/// Root object owning the session lifecycle.
pub struct StreamEngine {
    config: StreamConfig,
    state: Mutex<SessionState>,
    // Serializes connect/close end to end, so two connects can never
    // interleave and leave an orphaned writer behind.
    ops: tokio::sync::Mutex<()>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    producer: RwLock<Option<ProducerSlot>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl StreamEngine {
    /// Create an engine and the receiving end of its event channel.
    pub fn new(config: StreamConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            config,
            state: Mutex::new(SessionState::Disconnected),
            ops: tokio::sync::Mutex::new(()),
            active: tokio::sync::Mutex::new(None),
            producer: RwLock::new(None),
            events,
        });
        (engine, events_rx)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !state.can_transition_to(next) {
            // Teardown races (writer fault vs. close) can resolve a
            // state twice; anything else is a logic error worth a log.
            debug!(from = ?*state, to = ?next, "redundant state transition skipped");
            return;
        }
        debug!(from = ?*state, to = ?next, "session state");
        *state = next;
    }

    // ── Connect ──────────────────────────────────────────────────

    /// Open a transport and start streaming over it. Any prior
    /// session is torn down first.
    pub async fn connect(self: &Arc<Self>, handle: DeviceHandle) -> Result<(), StreamError> {
        let _ops = self.ops.lock().await;
        self.teardown().await;
        self.set_state(SessionState::Connecting);

        let kind = handle.kind();
        let sink = match open_transport(&handle).await {
            Ok(sink) => sink,
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                let _ = self.events.send(SessionEvent::Failed(err.to_string()));
                return Err(err);
            }
        };
        self.start_streaming(kind, sink).await;
        Ok(())
    }

    /// Negotiate the wireless peer-to-peer link, then stream over
    /// the resulting socket.
    ///
    /// `peer_joined` is the operator's signal that the receiver has
    /// joined the advertised group; beaconing stops and the peer
    /// scan starts when it fires.
    pub async fn connect_p2p<P: GroupProvisioner>(
        self: &Arc<Self>,
        negotiator: &mut Negotiator<P>,
        peer_joined: oneshot::Receiver<()>,
    ) -> Result<(), StreamError> {
        let _ops = self.ops.lock().await;
        self.teardown().await;
        self.set_state(SessionState::Connecting);

        let result = self.negotiate(negotiator, peer_joined).await;
        let stream = match result {
            Ok(stream) => stream,
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                let _ = self.events.send(SessionEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        let sink = p2p::sink_from_stream(stream)?;
        self.start_streaming(TransportKind::PeerToPeer, sink).await;
        Ok(())
    }

    async fn negotiate<P: GroupProvisioner>(
        &self,
        negotiator: &mut Negotiator<P>,
        peer_joined: oneshot::Receiver<()>,
    ) -> Result<tokio::net::TcpStream, StreamError> {
        let info = negotiator.provision_group().await?;
        let _ = self.events.send(SessionEvent::Negotiating(negotiator.phase()));
        let _ = self
            .events
            .send(SessionEvent::CredentialsReady(info.credentials.clone()));

        negotiator.beacon_until_joined(&info, peer_joined).await?;
        let stream = negotiator.scan_for_peer().await?;
        let _ = self.events.send(SessionEvent::Negotiating(negotiator.phase()));
        Ok(stream)
    }

    async fn start_streaming(self: &Arc<Self>, kind: TransportKind, sink: LinkSink) {
        let buffer = Arc::new(OutboundBuffer::new(self.config.buffer.capacity));
        let running = Arc::new(AtomicBool::new(true));
        let encoder = EventEncoder::new(self.config.stylus_only, Arc::clone(&buffer));

        let writer = BatchWriter::new(sink, Arc::clone(&buffer), Arc::clone(&running))
            .with_poll_timeout(self.config.poll_timeout());
        let engine = Arc::clone(self);
        let writer = tokio::spawn(async move {
            if let Err(err) = writer.run().await {
                warn!(error = %err, "stream ended by transport fault");
                engine.on_writer_fault(err);
            }
        });

        *self.producer.write().expect("producer lock poisoned") = Some(ProducerSlot {
            encoder,
            running: Arc::clone(&running),
        });
        *self.active.lock().await = Some(ActiveSession {
            kind,
            running,
            buffer,
            writer,
        });

        self.set_state(SessionState::Streaming);
        info!(transport = %kind, "session streaming");
        let _ = self.events.send(SessionEvent::Connected(kind));
    }

    /// Writer task fault path: mark the session dead so `forward`
    /// goes quiet immediately; the stale task/buffer are reaped by
    /// the next `connect` or `close`.
    fn on_writer_fault(&self, err: StreamError) {
        self.producer.write().expect("producer lock poisoned").take();
        self.set_state(SessionState::Disconnected);
        let _ = self.events.send(SessionEvent::Disconnected {
            reason: Some(err.to_string()),
        });
    }

    // ── Producer entry point ─────────────────────────────────────

    /// Route one pointer sample. Never blocks; with no live session
    /// the sample is ignored and `false` returned.
    pub fn forward(&self, sample: &PointerSample, surface: SurfaceSize) -> bool {
        let slot = self.producer.read().expect("producer lock poisoned");
        match slot.as_ref() {
            Some(slot) if slot.running.load(Ordering::SeqCst) => {
                slot.encoder.process(sample, surface)
            }
            _ => false,
        }
    }

    // ── Close ────────────────────────────────────────────────────

    /// Tear down the current session, if any. Idempotent; concurrent
    /// callers serialize and the late ones find nothing to do.
    pub async fn close(&self) {
        let _ops = self.ops.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            return;
        };
        let was_faulted = !session.running.load(Ordering::SeqCst);

        self.set_state(SessionState::Closing);
        self.producer.write().expect("producer lock poisoned").take();
        session.running.store(false, Ordering::SeqCst);

        // The writer wakes within one poll interval; give it a
        // bounded grace period, then stop waiting for it.
        let mut writer = session.writer;
        if tokio::time::timeout(CLOSE_JOIN_DEADLINE, &mut writer)
            .await
            .is_err()
        {
            warn!("writer did not stop in time, aborting task");
            writer.abort();
        }

        session.buffer.clear();
        self.set_state(SessionState::Disconnected);
        info!(transport = %session.kind, "session closed");
        if !was_faulted {
            let _ = self.events.send(SessionEvent::Disconnected { reason: None });
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
