//! # Peer Connection
//!
//! A bidirectional, optionally TLS-encrypted, framed stream with a
//! connect/disconnect lifecycle and automatic reconnection.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Peer Connection States                             │
//! │                                                                         │
//! │  ┌────────────┐    connect      ┌────────────┐                          │
//! │  │Disconnected│ ──────────────► │ Connecting │                          │
//! │  └────────────┘                 └─────┬──────┘                          │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                           │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌─────────────────┐               │
//! │        │              │ Connected  │  │ Disconnected    │               │
//! │        │              └─────┬──────┘  │ (fixed-delay    │               │
//! │        │                    │         │  retry while    │               │
//! │        │        stream fault│         │  auto-reconnect │               │
//! │        │        remote close│         │  is enabled)    │               │
//! │        │                    │         └─────────────────┘               │
//! │        │                    ▼                                           │
//! │        │             ┌─────────────┐   explicit disconnect              │
//! │        └──────────── │Disconnecting│ ◄─────────────────────             │
//! │                      └─────────────┘                                    │
//! │                                                                         │
//! │  RETRY POLICY                                                          │
//! │  ────────────                                                          │
//! │  • Network failures retry after a fixed delay, indefinitely, until     │
//! │    success or explicit disable                                         │
//! │  • Credential rejection is surfaced and NEVER retried automatically    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, LinkResult, StreamDirection};
use crate::framing::{FrameSplitter, Framing};
use crate::protocol::WireMessage;

// =============================================================================
// Peer State
// =============================================================================

/// Lifecycle state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect (including the handshake).
    Connecting,
    /// Connected and ready.
    Connected,
    /// Graceful teardown in progress.
    Disconnecting,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

// =============================================================================
// Peer Events
// =============================================================================

/// Tagged connection outcome, one channel instead of per-outcome listener
/// interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The connection (and handshake, when configured) succeeded.
    Connected,
    /// An established connection ended.
    Disconnected,
    /// A connection attempt failed; retried while auto-reconnect is on.
    ConnectionFailed { detail: String },
    /// The remote rejected our credentials; never retried automatically.
    AuthenticationFailed { reason: String },
}

// =============================================================================
// Configuration
// =============================================================================

/// Transport encryption for a peer connection.
#[derive(Debug, Clone)]
pub enum Encryption {
    /// Plain TCP (tests, trusted local links).
    None,
    /// TLS via the platform connector.
    Tls {
        /// Domain presented for certificate validation.
        domain: String,
        /// Accept invalid certs (self-signed local gateways).
        accept_invalid_certs: bool,
    },
}

/// Configuration for an outbound peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Remote endpoint as `host:port`.
    pub remote: String,

    /// Connection + handshake timeout.
    pub connect_timeout: Duration,

    /// Whether network failures schedule automatic retries.
    pub auto_reconnect: bool,

    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,

    /// Message framing for this connection.
    pub framing: Framing,

    /// Transport encryption.
    pub encryption: Encryption,

    /// Handshake to perform right after the transport connects. A `Reject`
    /// response fails `connect` with an authentication error.
    pub hello: Option<WireMessage>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            remote: String::new(),
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            framing: Framing::default(),
            encryption: Encryption::None,
            hello: None,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reconnect_attempts: AtomicU32,
    last_sent: StdRwLock<Option<DateTime<Utc>>>,
    last_received: StdRwLock<Option<DateTime<Utc>>>,
}

impl Counters {
    fn note_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_sent.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    fn note_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_received.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }
}

/// Snapshot of a peer's counters for status queries.
#[derive(Debug, Clone)]
pub struct PeerStats {
    /// Current lifecycle state.
    pub state: PeerState,
    /// Total bytes written to the stream.
    pub bytes_sent: u64,
    /// Total bytes read from the stream.
    pub bytes_received: u64,
    /// Reconnection attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// When the last frame was written.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// When the last bytes arrived.
    pub last_received_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Peer Handle
// =============================================================================

/// Handle for interacting with a peer from other components.
#[derive(Clone)]
pub struct PeerHandle {
    outgoing_tx: mpsc::Sender<WireMessage>,
    state: Arc<RwLock<PeerState>>,
    counters: Arc<Counters>,
    shutdown_tx: mpsc::Sender<()>,
    reconnect_enabled: Arc<AtomicBool>,
}

impl PeerHandle {
    /// Sends a message; valid only while connected.
    pub async fn send(&self, message: WireMessage) -> LinkResult<()> {
        let state = *self.state.read().await;
        if state != PeerState::Connected {
            return Err(LinkError::InvalidState {
                operation: "send",
                state: state.to_string(),
            });
        }
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| LinkError::ChannelClosed("peer outgoing queue".to_string()))
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> PeerState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == PeerState::Connected
    }

    /// Returns a counters snapshot.
    pub async fn stats(&self) -> PeerStats {
        PeerStats {
            state: *self.state.read().await,
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            reconnect_attempts: self.counters.reconnect_attempts.load(Ordering::Relaxed),
            last_sent_at: *self
                .counters
                .last_sent
                .read()
                .unwrap_or_else(|e| e.into_inner()),
            last_received_at: *self
                .counters
                .last_received
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Enables or disables automatic reconnection.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.reconnect_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Disconnects and disables reconnection. Idempotent: repeated calls
    /// and calls on an already-dead peer are no-ops.
    pub fn disconnect(&self) {
        self.reconnect_enabled.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.try_send(());
    }
}

// =============================================================================
// Peer
// =============================================================================

/// Outcome of one established connection's read/write loop.
enum LoopEnd {
    /// Explicit local disconnect.
    Shutdown,
    /// Remote closed the stream cleanly.
    RemoteClosed,
}

pub(crate) trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

pub(crate) type BoxedStream = Box<dyn PeerStream>;

/// A peer connection with automatic reconnection.
///
/// Owned exclusively by one session; the run loop is spawned as a
/// background task and interacted with through [`PeerHandle`].
pub struct Peer {
    config: PeerConfig,
    state: Arc<RwLock<PeerState>>,
    counters: Arc<Counters>,
    outgoing_rx: mpsc::Receiver<WireMessage>,
    incoming_tx: mpsc::Sender<WireMessage>,
    events_tx: mpsc::Sender<PeerEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    reconnect_enabled: Arc<AtomicBool>,
}

impl Peer {
    /// Creates a peer and spawns its background task.
    ///
    /// Returns the handle, a receiver for incoming messages, and a
    /// receiver for connection events.
    pub fn spawn(
        config: PeerConfig,
    ) -> (
        PeerHandle,
        mpsc::Receiver<WireMessage>,
        mpsc::Receiver<PeerEvent>,
    ) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<WireMessage>(100);
        let (incoming_tx, incoming_rx) = mpsc::channel::<WireMessage>(100);
        let (events_tx, events_rx) = mpsc::channel::<PeerEvent>(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(PeerState::Disconnected));
        let counters = Arc::new(Counters::default());
        let reconnect_enabled = Arc::new(AtomicBool::new(config.auto_reconnect));

        let peer = Peer {
            config,
            state: state.clone(),
            counters: counters.clone(),
            outgoing_rx,
            incoming_tx,
            events_tx,
            shutdown_rx,
            reconnect_enabled: reconnect_enabled.clone(),
        };

        tokio::spawn(peer.run());

        let handle = PeerHandle {
            outgoing_tx,
            state,
            counters,
            shutdown_tx,
            reconnect_enabled,
        };

        (handle, incoming_rx, events_rx)
    }

    /// Main peer loop: connect, run, reconnect on network failure.
    async fn run(mut self) {
        info!(remote = %self.config.remote, "Peer starting");

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                break;
            }

            *self.state.write().await = PeerState::Connecting;

            match self.establish().await {
                Ok((stream, splitter, extras)) => {
                    info!(remote = %self.config.remote, "Peer connected");
                    *self.state.write().await = PeerState::Connected;
                    self.counters.reconnect_attempts.store(0, Ordering::Relaxed);
                    self.emit(PeerEvent::Connected);

                    // Frames that arrived bundled with the handshake reply.
                    for message in extras {
                        if self.incoming_tx.send(message).await.is_err() {
                            break;
                        }
                    }

                    match self.connection_loop(stream, splitter).await {
                        Ok(LoopEnd::Shutdown) => {
                            *self.state.write().await = PeerState::Disconnecting;
                            self.emit(PeerEvent::Disconnected);
                            break;
                        }
                        Ok(LoopEnd::RemoteClosed) => {
                            info!(remote = %self.config.remote, "Remote closed the connection");
                            self.emit(PeerEvent::Disconnected);
                        }
                        Err(e) => {
                            warn!(remote = %self.config.remote, error = %e, "Connection loop ended");
                            self.emit(PeerEvent::Disconnected);
                        }
                    }
                }
                Err(LinkError::Authentication(reason)) => {
                    error!(remote = %self.config.remote, %reason, "Authentication rejected");
                    self.emit(PeerEvent::AuthenticationFailed { reason });
                    break;
                }
                Err(e) => {
                    warn!(remote = %self.config.remote, error = %e, "Connect attempt failed");
                    self.emit(PeerEvent::ConnectionFailed {
                        detail: e.to_string(),
                    });
                }
            }

            *self.state.write().await = PeerState::Disconnected;

            if !self.reconnect_enabled.load(Ordering::Relaxed) {
                break;
            }

            self.counters
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);

            debug!(
                remote = %self.config.remote,
                delay = ?self.config.reconnect_delay,
                "Waiting before reconnect"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown_rx.recv() => break,
            }
        }

        *self.state.write().await = PeerState::Disconnected;
        info!(remote = %self.config.remote, "Peer stopped");
    }

    /// Resolves, connects, wraps in TLS, and performs the handshake.
    async fn establish(&self) -> LinkResult<(BoxedStream, FrameSplitter, Vec<WireMessage>)> {
        // Resolve the remote endpoint.
        let mut addrs = tokio::net::lookup_host(&self.config.remote)
            .await
            .map_err(|_| LinkError::UnknownHost(self.config.remote.clone()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| LinkError::UnknownHost(self.config.remote.clone()))?;

        // TCP connect with timeout.
        let tcp = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => return Err(LinkError::Connection(e.to_string())),
            Err(_) => return Err(LinkError::Timeout(self.config.connect_timeout.as_secs())),
        };

        // Optional TLS wrap.
        let mut stream: BoxedStream = match &self.config.encryption {
            Encryption::None => Box::new(tcp),
            Encryption::Tls {
                domain,
                accept_invalid_certs,
            } => {
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(*accept_invalid_certs)
                    .build()
                    .map_err(|e| LinkError::Connection(format!("TLS setup: {}", e)))?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let tls = connector
                    .connect(domain, tcp)
                    .await
                    .map_err(|e| LinkError::Connection(format!("TLS handshake: {}", e)))?;
                Box::new(tls)
            }
        };

        let mut splitter = FrameSplitter::new(self.config.framing.clone());
        let mut extras = Vec::new();

        if let Some(hello) = &self.config.hello {
            extras = self.handshake(&mut stream, &mut splitter, hello).await?;
        }

        Ok((stream, splitter, extras))
    }

    /// Sends the hello frame and waits for welcome or reject.
    async fn handshake(
        &self,
        stream: &mut BoxedStream,
        splitter: &mut FrameSplitter,
        hello: &WireMessage,
    ) -> LinkResult<Vec<WireMessage>> {
        let bytes = self.config.framing.encode_frame(&hello.encode())?;
        stream
            .write_all(&bytes)
            .await
            .map_err(|e| LinkError::Connection(format!("handshake send: {}", e)))?;
        self.counters.note_sent(bytes.len());

        let deadline = self.config.connect_timeout;
        let reply = timeout(deadline, async {
            let mut buf = [0u8; 4096];
            loop {
                let n = stream
                    .read(&mut buf)
                    .await
                    .map_err(|e| LinkError::Connection(format!("handshake read: {}", e)))?;
                if n == 0 {
                    return Err(LinkError::Connection(
                        "connection closed during handshake".to_string(),
                    ));
                }
                self.counters.note_received(n);
                let mut bodies = splitter.feed(&buf[..n])?;
                if !bodies.is_empty() {
                    return Ok(bodies.drain(..).collect::<Vec<String>>());
                }
            }
        })
        .await
        .map_err(|_| LinkError::Timeout(deadline.as_secs()))??;

        let mut messages = reply.into_iter();
        let first = messages
            .next()
            .ok_or_else(|| LinkError::Response("empty handshake reply".to_string()))?;

        match WireMessage::decode(&first)? {
            WireMessage::Welcome { object_id, .. } => {
                debug!(object = %object_id, "Handshake complete");
            }
            WireMessage::Reject { code, reason } => {
                return Err(LinkError::Authentication(format!("{}: {}", code, reason)));
            }
            other => {
                return Err(LinkError::Response(format!(
                    "expected welcome, got {}",
                    other.type_name()
                )));
            }
        }

        // Any frames bundled after the welcome belong to the session.
        messages
            .map(|body| WireMessage::decode(&body))
            .collect::<LinkResult<Vec<WireMessage>>>()
    }

    /// Read/write loop over one established connection.
    async fn connection_loop(
        &mut self,
        stream: BoxedStream,
        mut splitter: FrameSplitter,
    ) -> LinkResult<LoopEnd> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = [0u8; 4096];

        loop {
            tokio::select! {
                // Incoming bytes.
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => return Ok(LoopEnd::RemoteClosed),
                        Ok(n) => {
                            self.counters.note_received(n);
                            for body in splitter.feed(&buf[..n])? {
                                match WireMessage::decode(&body) {
                                    Ok(WireMessage::Ping { ts }) => {
                                        let pong = WireMessage::Pong { ts };
                                        let bytes =
                                            self.config.framing.encode_frame(&pong.encode())?;
                                        writer.write_all(&bytes).await.map_err(|e| {
                                            LinkError::Stream {
                                                direction: StreamDirection::Output,
                                                detail: e.to_string(),
                                            }
                                        })?;
                                        self.counters.note_sent(bytes.len());
                                    }
                                    Ok(message) => {
                                        debug!(msg_type = %message.type_name(), "Received message");
                                        if self.incoming_tx.send(message).await.is_err() {
                                            warn!("Incoming message receiver dropped");
                                            return Err(LinkError::ChannelClosed(
                                                "peer incoming queue".to_string(),
                                            ));
                                        }
                                    }
                                    Err(e) => {
                                        // Malformed frame: logged, skipped, no corruption.
                                        warn!(error = %e, "Discarding malformed frame");
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            return Err(LinkError::Stream {
                                direction: StreamDirection::Input,
                                detail: e.to_string(),
                            });
                        }
                    }
                }

                // Outgoing messages.
                Some(message) = self.outgoing_rx.recv() => {
                    let bytes = self.config.framing.encode_frame(&message.encode())?;
                    debug!(msg_type = %message.type_name(), "Sending message");
                    writer.write_all(&bytes).await.map_err(|e| LinkError::Stream {
                        direction: StreamDirection::Output,
                        detail: e.to_string(),
                    })?;
                    self.counters.note_sent(bytes.len());
                }

                // Explicit disconnect.
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    return Ok(LoopEnd::Shutdown);
                }
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "Peer event dropped");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ConnScope;
    use tokio::net::TcpListener;

    fn test_config(remote: String) -> PeerConfig {
        PeerConfig {
            remote,
            connect_timeout: Duration::from_secs(2),
            auto_reconnect: false,
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn read_one_frame(socket: &mut TcpStream, splitter: &mut FrameSplitter) -> String {
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "socket closed before a frame arrived");
            let mut frames = splitter.feed(&buf[..n]).unwrap();
            if let Some(frame) = frames.pop() {
                return frame;
            }
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PeerState::Connected.to_string(), "connected");
        assert_eq!(PeerState::Disconnecting.to_string(), "disconnecting");
    }

    #[test]
    fn test_config_default() {
        let config = PeerConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_invalid_state() {
        let (handle, _incoming, _events) = Peer::spawn(test_config("127.0.0.1:1".to_string()));

        let err = handle.send(WireMessage::ping()).await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidState { operation: "send", .. }));
    }

    #[tokio::test]
    async fn test_unresolvable_host_reports_connection_failure() {
        let config = test_config("no-such-host.invalid:9999".to_string());
        let (_handle, _incoming, mut events) = Peer::spawn(config);

        match events.recv().await.unwrap() {
            PeerEvent::ConnectionFailed { detail } => {
                assert!(detail.to_lowercase().contains("unknown host"));
            }
            other => panic!("expected ConnectionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_handshake_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let framing = Framing::default();

        // Fake server: welcome the client, then expect one event-free ping.
        let server_framing = framing.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut splitter = FrameSplitter::new(server_framing.clone());

            let hello = read_one_frame(&mut socket, &mut splitter).await;
            let parsed = WireMessage::decode(&hello).unwrap();
            assert_eq!(parsed.type_name(), "hello");

            let welcome = WireMessage::Welcome {
                object_id: "obj-1".to_string(),
                server_time: chrono::Utc::now().to_rfc3339(),
            };
            let bytes = server_framing.encode_frame(&welcome.encode()).unwrap();
            socket.write_all(&bytes).await.unwrap();

            let frame = read_one_frame(&mut socket, &mut splitter).await;
            assert_eq!(WireMessage::decode(&frame).unwrap().type_name(), "ping");
        });

        let mut config = test_config(addr.to_string());
        config.hello = Some(WireMessage::hello(
            "srv-1",
            "usr-1",
            "inst-1",
            ConnScope::OnlyLocal,
        ));
        let (handle, _incoming, mut events) = Peer::spawn(config);

        assert_eq!(events.recv().await.unwrap(), PeerEvent::Connected);
        assert!(handle.is_connected().await);

        handle.send(WireMessage::ping()).await.unwrap();
        server.await.unwrap();

        let stats = handle.stats().await;
        assert!(stats.bytes_sent > 0);
        assert!(stats.bytes_received > 0);

        handle.disconnect();
    }

    #[tokio::test]
    async fn test_reject_surfaces_authentication_failure_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let framing = Framing::default();

        let server_framing = framing.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut splitter = FrameSplitter::new(server_framing.clone());
            let _hello = read_one_frame(&mut socket, &mut splitter).await;

            let reject = WireMessage::reject(crate::protocol::REJECT_AUTH, "bad credentials");
            let bytes = server_framing.encode_frame(&reject.encode()).unwrap();
            socket.write_all(&bytes).await.unwrap();
        });

        let mut config = test_config(addr.to_string());
        // Auto-reconnect on: an auth rejection must still stop the peer.
        config.auto_reconnect = true;
        config.hello = Some(WireMessage::hello(
            "srv-1",
            "usr-1",
            "inst-1",
            ConnScope::LocalAndCloud,
        ));
        let (handle, _incoming, mut events) = Peer::spawn(config);

        match events.recv().await.unwrap() {
            PeerEvent::AuthenticationFailed { reason } => {
                assert!(reason.contains("bad credentials"));
            }
            other => panic!("expected AuthenticationFailed, got {:?}", other),
        }

        // The peer gave up rather than retrying.
        assert!(events.recv().await.is_none());
        assert_eq!(handle.state().await, PeerState::Disconnected);
    }

    #[tokio::test]
    async fn test_auto_reconnect_counts_attempts() {
        // Nothing listens here; every attempt fails fast.
        let mut config = test_config("127.0.0.1:9".to_string());
        config.auto_reconnect = true;
        config.reconnect_delay = Duration::from_millis(10);
        let (handle, _incoming, mut events) = Peer::spawn(config);

        // Wait for a few failure events.
        for _ in 0..3 {
            match events.recv().await.unwrap() {
                PeerEvent::ConnectionFailed { .. } => {}
                other => panic!("expected ConnectionFailed, got {:?}", other),
            }
        }

        assert!(handle.stats().await.reconnect_attempts >= 2);
        handle.disconnect();
    }
}
