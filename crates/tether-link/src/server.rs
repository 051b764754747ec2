//! # Session Server
//!
//! Accepts incoming service connections, extracts the session identity at
//! handshake, and delivers permission-filtered fan-out to each session.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Session Server                                     │
//! │                                                                         │
//! │  TcpListener (optionally TLS-wrapped)                                   │
//! │       │ accept                                                          │
//! │       ▼                                                                 │
//! │  ┌─────────────────┐    hello     ┌──────────────────────────────┐      │
//! │  │  per-connection │ ◄─────────── │ service (srv, usr, instance) │      │
//! │  │  task           │  welcome /   └──────────────────────────────┘      │
//! │  │                 │  reject                                            │
//! │  └────────┬────────┘                                                    │
//! │           │ register                                                    │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   at most one live session per exact triple;       │
//! │  │ SessionRegistry │   same service+user, different instance = two      │
//! │  │ (shared with    │   independent sessions                             │
//! │  │ the permission  │                                                    │
//! │  │ engine)         │   disconnected records retained for stats          │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  FRAMING DEFAULTS                                                      │
//! │  ────────────────                                                      │
//! │  Changing the server default re-frames only sessions still on the      │
//! │  previous default (update-if-matching-old-default), never sessions     │
//! │  that chose their own encoding.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use tether_core::PROTOCOL_VERSION;

use crate::discovery::{Discovery, ServicePresence};
use crate::engine::PermissionEngine;
use crate::error::{LinkError, LinkResult};
use crate::framing::{FrameSplitter, Framing};
use crate::peer::BoxedStream;
use crate::protocol::{
    WireMessage, REJECT_DUPLICATE_SESSION, REJECT_VERSION,
};
use crate::session::{Session, SessionKey, SessionRegistry, SessionStats};

// =============================================================================
// Constants
// =============================================================================

/// Default listening port for the session server.
pub const DEFAULT_SERVER_PORT: u16 = 8472;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the session server.
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0).
    pub bind_addr: String,
    /// Port to listen on (0 = OS-assigned).
    pub port: u16,
    /// How long a fresh connection may take to send its hello.
    pub handshake_timeout: Duration,
    /// Framing assigned to new sessions.
    pub default_framing: Framing,
    /// TLS acceptor; `None` listens in plaintext (tests, trusted links).
    pub tls: Option<tokio_native_tls::TlsAcceptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            handshake_timeout: Duration::from_secs(10),
            default_framing: Framing::default(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the session server.
struct ServerState {
    registry: Arc<SessionRegistry>,
    engine: Arc<PermissionEngine>,
    default_framing: RwLock<Framing>,
    inbound_tx: mpsc::Sender<(SessionKey, WireMessage)>,
    handshake_timeout: Duration,
}

// =============================================================================
// Server Handle
// =============================================================================

/// Handle for controlling a running session server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
    discovery: Arc<dyn Discovery>,
    shutdown_tx: mpsc::Sender<()>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Address the server actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current session statistics.
    pub async fn session_stats(&self) -> SessionStats {
        self.state.registry.stats().await
    }

    /// Replaces the server-level default framing. Only currently-connected
    /// sessions whose framing still equals the previous default are
    /// updated; sessions on their own encoding are untouched.
    pub async fn set_default_framing(&self, new: Framing) -> usize {
        let old = {
            let mut default = self.state.default_framing.write().await;
            std::mem::replace(&mut *default, new.clone())
        };
        if old == new {
            return 0;
        }
        self.state.registry.update_framing_matching(&old, &new).await
    }

    /// Stops accepting connections and withdraws the discovery
    /// announcement.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.discovery.deregister().await {
            warn!(error = %e, "Discovery deregister failed");
        }
    }
}

// =============================================================================
// Session Server
// =============================================================================

/// The local server accepting service sessions for one object.
pub struct SessionServer {
    config: ServerConfig,
}

impl SessionServer {
    /// Creates a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        SessionServer { config }
    }

    /// Binds the listener, publishes via discovery, and starts accepting.
    ///
    /// Incoming non-keepalive messages arrive on the returned receiver as
    /// `(session, message)` pairs.
    pub async fn start(
        self,
        registry: Arc<SessionRegistry>,
        engine: Arc<PermissionEngine>,
        discovery: Arc<dyn Discovery>,
    ) -> LinkResult<(ServerHandle, mpsc::Receiver<(SessionKey, WireMessage)>)> {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| LinkError::ServerStartup {
                addr: bind_addr.clone(),
                detail: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LinkError::ServerStartup {
                addr: bind_addr.clone(),
                detail: e.to_string(),
            })?;

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state = Arc::new(ServerState {
            registry,
            engine,
            default_framing: RwLock::new(self.config.default_framing.clone()),
            inbound_tx,
            handshake_timeout: self.config.handshake_timeout,
        });

        let presence = ServicePresence {
            object_id: state.engine.object_id().to_string(),
            addr: local_addr,
        };
        if let Err(e) = discovery.publish(&presence).await {
            warn!(error = %e, "Discovery publish failed - continuing without announcement");
        }

        info!(addr = %local_addr, "Session server started");

        let accept_state = state.clone();
        let tls = self.config.tls.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, addr)) => {
                                debug!(%addr, "Incoming connection");
                                let state = accept_state.clone();
                                let tls = tls.clone();
                                tokio::spawn(handle_connection(socket, addr, state, tls));
                            }
                            Err(e) => {
                                warn!(error = %e, "Accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Session server shutting down");
                        break;
                    }
                }
            }
        });

        let handle = ServerHandle {
            state,
            discovery,
            shutdown_tx,
            local_addr,
        };

        Ok((handle, inbound_rx))
    }
}

// =============================================================================
// Per-Connection Handling
// =============================================================================

/// Drives one accepted connection: handshake, register, serve, cleanup.
async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    tls: Option<tokio_native_tls::TlsAcceptor>,
) {
    // Optional TLS accept.
    let mut stream: BoxedStream = match tls {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(tls_stream) => Box::new(tls_stream),
            Err(e) => {
                warn!(%addr, error = %e, "TLS accept failed");
                return;
            }
        },
        None => Box::new(socket),
    };

    let framing = state.default_framing.read().await.clone();
    let mut splitter = FrameSplitter::new(framing.clone());

    // Wait for the hello; frames pipelined right behind it are preserved.
    let (hello, early_frames) =
        match receive_hello(&mut stream, &mut splitter, state.handshake_timeout).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%addr, error = %e, "Handshake failed - closing connection");
                return;
            }
        };

    let (key, scope, version) = match hello {
        WireMessage::Hello {
            service_id,
            user_id,
            instance_id,
            scope,
            version,
        } => (
            SessionKey::new(&service_id, &user_id, &instance_id),
            scope,
            version,
        ),
        other => {
            warn!(%addr, got = %other.type_name(), "Expected hello - closing connection");
            return;
        }
    };

    if version != PROTOCOL_VERSION {
        let reject = WireMessage::reject(
            REJECT_VERSION,
            &format!("unsupported protocol version {}", version),
        );
        send_frame(&mut stream, &framing, &reject).await;
        return;
    }

    // Compute the handshake-time grant and register the session.
    let granted = state
        .engine
        .permission_for(&key.service_id, &key.user_id, scope)
        .await;
    let session = Session::new(key.clone(), scope, granted);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WireMessage>(64);

    if let Err(e) = state
        .registry
        .register(session, outgoing_tx, framing.clone())
        .await
    {
        let reject = WireMessage::reject(REJECT_DUPLICATE_SESSION, &e.to_string());
        send_frame(&mut stream, &framing, &reject).await;
        return;
    }

    let welcome = WireMessage::Welcome {
        object_id: state.engine.object_id().to_string(),
        server_time: chrono::Utc::now().to_rfc3339(),
    };
    if !send_frame(&mut stream, &framing, &welcome).await {
        state.registry.disconnect(&key).await;
        return;
    }

    info!(session = %key, %addr, granted = %granted, "Session established");

    for body in early_frames {
        if let Ok(message) = WireMessage::decode(&body) {
            let _ = state.inbound_tx.send((key.clone(), message)).await;
        }
    }

    // Serve until the stream ends.
    let mut buf = [0u8; 4096];
    'serve: loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!(session = %key, "Session closed by remote");
                        break 'serve;
                    }
                    Ok(n) => {
                        let bodies = match splitter.feed(&buf[..n]) {
                            Ok(bodies) => bodies,
                            Err(e) => {
                                warn!(session = %key, error = %e, "Undecodable bytes - closing session");
                                break 'serve;
                            }
                        };
                        for body in bodies {
                            match WireMessage::decode(&body) {
                                Ok(WireMessage::Ping { ts }) => {
                                    let pong = WireMessage::Pong { ts };
                                    if !send_frame(&mut stream, &framing, &pong).await {
                                        break 'serve;
                                    }
                                }
                                Ok(message) => {
                                    if state.inbound_tx.send((key.clone(), message)).await.is_err() {
                                        warn!(session = %key, "Inbound receiver dropped");
                                        break 'serve;
                                    }
                                }
                                Err(e) => {
                                    // Malformed request: logged, skipped.
                                    warn!(session = %key, error = %e, "Discarding malformed frame");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(session = %key, error = %e, "Session read error");
                        break 'serve;
                    }
                }
            }

            Some(message) = outgoing_rx.recv() => {
                // Sessions may have been re-framed by a default update.
                let current = state
                    .registry
                    .session_framing(&key)
                    .await
                    .unwrap_or_else(|| framing.clone());
                if !send_frame(&mut stream, &current, &message).await {
                    break 'serve;
                }
            }
        }
    }

    state.registry.disconnect(&key).await;
}

/// Reads frames until the first complete message arrives. Extra frames
/// that arrived in the same reads are returned undecoded.
async fn receive_hello(
    stream: &mut BoxedStream,
    splitter: &mut FrameSplitter,
    deadline: Duration,
) -> LinkResult<(WireMessage, Vec<String>)> {
    let mut bodies = timeout(deadline, async {
        let mut buf = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| LinkError::Connection(e.to_string()))?;
            if n == 0 {
                return Err(LinkError::Connection(
                    "connection closed before handshake".to_string(),
                ));
            }
            let bodies = splitter.feed(&buf[..n])?;
            if !bodies.is_empty() {
                return Ok(bodies);
            }
        }
    })
    .await
    .map_err(|_| LinkError::Timeout(deadline.as_secs()))??;

    let first = bodies.remove(0);
    Ok((WireMessage::decode(&first)?, bodies))
}

/// Writes one framed message; returns false when the stream is gone.
async fn send_frame(stream: &mut BoxedStream, framing: &Framing, message: &WireMessage) -> bool {
    let bytes = match framing.encode_frame(&message.encode()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Frame encoding failed");
            return false;
        }
    };
    if let Err(e) = stream.write_all(&bytes).await {
        debug!(error = %e, "Frame write failed");
        return false;
    }
    true
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ConnScope;
    use tether_store::PermissionFileStore;

    use crate::discovery::RecordingDiscovery;

    async fn start_test_server(
        dir: &std::path::Path,
    ) -> (
        ServerHandle,
        mpsc::Receiver<(SessionKey, WireMessage)>,
        Arc<SessionRegistry>,
        Arc<RecordingDiscovery>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let store = PermissionFileStore::new(&dir.join("permissions.txt"), "obj-1");
        let engine = Arc::new(PermissionEngine::new(
            "obj-1",
            Some("owner-1".to_string()),
            store,
            registry.clone(),
        ));
        let discovery = Arc::new(RecordingDiscovery::default());

        let config = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let (handle, inbound_rx) = SessionServer::new(config)
            .start(registry.clone(), engine, discovery.clone())
            .await
            .unwrap();

        (handle, inbound_rx, registry, discovery)
    }

    /// Raw test client: connect, say hello, return the first reply.
    async fn connect_and_hello(
        addr: SocketAddr,
        instance: &str,
    ) -> (TcpStream, WireMessage) {
        let framing = Framing::default();
        let mut socket = TcpStream::connect(addr).await.unwrap();
        let hello = WireMessage::hello("srv-1", "usr-1", instance, ConnScope::OnlyLocal);
        socket
            .write_all(&framing.encode_frame(&hello.encode()).unwrap())
            .await
            .unwrap();

        let mut splitter = FrameSplitter::new(framing);
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before replying");
            let frames = splitter.feed(&buf[..n]).unwrap();
            if let Some(frame) = frames.into_iter().next() {
                return (socket, WireMessage::decode(&frame).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_yields_welcome_and_publishes_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _inbound, _registry, discovery) = start_test_server(dir.path()).await;

        let (_socket, reply) = connect_and_hello(handle.local_addr(), "inst-1").await;
        match reply {
            WireMessage::Welcome { object_id, .. } => assert_eq!(object_id, "obj-1"),
            other => panic!("expected welcome, got {:?}", other),
        }

        let published = discovery.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].object_id, "obj-1");

        handle.shutdown().await;
        assert_eq!(discovery.deregister_count(), 1);
    }

    // Scenario: a second connection with the exact same triple is refused
    // while the first is connected; the active session count stays 1.
    #[tokio::test]
    async fn test_duplicate_triple_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _inbound, registry, _discovery) = start_test_server(dir.path()).await;

        let (_first, reply) = connect_and_hello(handle.local_addr(), "inst-1").await;
        assert_eq!(reply.type_name(), "welcome");

        let (_second, reply) = connect_and_hello(handle.local_addr(), "inst-1").await;
        match reply {
            WireMessage::Reject { code, .. } => assert_eq!(code, REJECT_DUPLICATE_SESSION),
            other => panic!("expected reject, got {:?}", other),
        }

        assert_eq!(registry.active_count().await, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_identity_different_instance_connects() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _inbound, registry, _discovery) = start_test_server(dir.path()).await;

        let (_a, reply_a) = connect_and_hello(handle.local_addr(), "inst-a").await;
        let (_b, reply_b) = connect_and_hello(handle.local_addr(), "inst-b").await;

        assert_eq!(reply_a.type_name(), "welcome");
        assert_eq!(reply_b.type_name(), "welcome");
        assert_eq!(registry.active_count().await, 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_reports_server_startup() {
        // Occupy a port, then try to bind it again.
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = blocker.local_addr().unwrap();

        let registry = Arc::new(SessionRegistry::new());
        let dir = tempfile::tempdir().unwrap();
        let store = PermissionFileStore::new(&dir.path().join("p.txt"), "obj-1");
        let engine = Arc::new(PermissionEngine::new("obj-1", None, store, registry.clone()));

        let config = ServerConfig {
            bind_addr: taken.ip().to_string(),
            port: taken.port(),
            ..Default::default()
        };
        let err = SessionServer::new(config)
            .start(registry, engine, Arc::new(crate::discovery::NoopDiscovery))
            .await
            .unwrap_err();

        match err {
            LinkError::ServerStartup { addr, .. } => {
                assert!(addr.contains(&taken.port().to_string()));
            }
            other => panic!("expected ServerStartup, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_messages_carry_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut inbound, _registry, _discovery) = start_test_server(dir.path()).await;

        let (mut socket, reply) = connect_and_hello(handle.local_addr(), "inst-1").await;
        assert_eq!(reply.type_name(), "welcome");

        let framing = Framing::default();
        let ping_free = WireMessage::Pong {
            ts: chrono::Utc::now().to_rfc3339(),
        };
        socket
            .write_all(&framing.encode_frame(&ping_free.encode()).unwrap())
            .await
            .unwrap();

        let (key, message) = inbound.recv().await.unwrap();
        assert_eq!(key, SessionKey::new("srv-1", "usr-1", "inst-1"));
        assert_eq!(message.type_name(), "pong");
        handle.shutdown().await;
    }
}
