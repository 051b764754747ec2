//! # Cloud Client
//!
//! The object's single uplink to its assigned gateway.
//!
//! Exactly one outbound connection exists per object: the client owns one
//! peer, auto-reconnects after unexpected disconnects, and invokes the
//! resync callback on every successful (re)connect - which replays the
//! permission fan-out and kicks the history sync engine, reconciling
//! everything that happened while the cloud was unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use tether_core::ConnScope;

use crate::engine::PermissionEngine;
use crate::error::LinkResult;
use crate::framing::Framing;
use crate::peer::{Encryption, Peer, PeerConfig, PeerEvent, PeerHandle, PeerStats};
use crate::protocol::WireMessage;
use crate::sync::SyncHandle;

// =============================================================================
// Resync Callback
// =============================================================================

/// Invoked on every successful cloud (re)connect.
#[async_trait]
pub trait ResyncHandler: Send + Sync {
    /// Reconcile state with the cloud after a (re)connect.
    async fn on_cloud_connected(&self);
}

/// The standard resync wiring: permission resync plus history sync.
pub struct LinkResync {
    engine: Arc<PermissionEngine>,
    sync: SyncHandle,
}

impl LinkResync {
    /// Couples the permission engine and sync engine to the uplink.
    pub fn new(engine: Arc<PermissionEngine>, sync: SyncHandle) -> Self {
        LinkResync { engine, sync }
    }
}

#[async_trait]
impl ResyncHandler for LinkResync {
    async fn on_cloud_connected(&self) {
        let notified = self.engine.resync_all().await;
        self.sync.trigger();
        info!(notified, "Cloud resync completed");
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the cloud uplink.
#[derive(Debug, Clone)]
pub struct CloudClientConfig {
    /// Object this uplink belongs to.
    pub object_id: String,

    /// Gateway endpoint as `host:port` (selected by the broker).
    pub gateway: String,

    /// Connection + handshake timeout.
    pub connect_timeout: Duration,

    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,

    /// Whether unexpected disconnects schedule automatic retries.
    pub auto_reconnect: bool,

    /// Framing for the uplink.
    pub framing: Framing,

    /// Transport encryption.
    pub encryption: Encryption,
}

impl Default for CloudClientConfig {
    fn default() -> Self {
        CloudClientConfig {
            object_id: String::new(),
            gateway: String::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            auto_reconnect: true,
            framing: Framing::default(),
            encryption: Encryption::None,
        }
    }
}

// =============================================================================
// Cloud Client
// =============================================================================

/// Handle to the object's cloud uplink.
#[derive(Clone)]
pub struct CloudClientHandle {
    peer: PeerHandle,
    connected_rx: watch::Receiver<bool>,
}

impl CloudClientHandle {
    /// Sends a message upstream; valid only while connected.
    pub async fn send(&self, message: WireMessage) -> LinkResult<()> {
        self.peer.send(message).await
    }

    /// True while the uplink is established.
    pub async fn is_connected(&self) -> bool {
        self.peer.is_connected().await
    }

    /// Connectivity watch for the sync engine.
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Uplink counters.
    pub async fn stats(&self) -> PeerStats {
        self.peer.stats().await
    }

    /// Tears the uplink down and disables reconnection. Idempotent.
    pub fn disconnect(&self) {
        self.peer.disconnect();
    }
}

/// The object's cloud uplink.
pub struct CloudClient;

impl CloudClient {
    /// Spawns the uplink and its event task.
    ///
    /// Returns the handle and the stream of messages arriving from the
    /// gateway (actions brokered from cloud services).
    pub fn spawn(
        config: CloudClientConfig,
        resync: Arc<dyn ResyncHandler>,
    ) -> (CloudClientHandle, mpsc::Receiver<WireMessage>) {
        // The uplink identifies itself with its object id; the gateway
        // brokers per object, not per user.
        let hello = WireMessage::hello(
            &config.object_id,
            "object",
            &uuid::Uuid::new_v4().to_string(),
            ConnScope::LocalAndCloud,
        );

        let peer_config = PeerConfig {
            remote: config.gateway.clone(),
            connect_timeout: config.connect_timeout,
            auto_reconnect: config.auto_reconnect,
            reconnect_delay: config.reconnect_delay,
            framing: config.framing.clone(),
            encryption: config.encryption.clone(),
            hello: Some(hello),
        };

        let (peer, incoming_rx, mut events_rx) = Peer::spawn(peer_config);
        let (connected_tx, connected_rx) = watch::channel(false);

        let object_id = config.object_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    PeerEvent::Connected => {
                        info!(object_id = %object_id, "Cloud uplink connected");
                        let _ = connected_tx.send(true);
                        resync.on_cloud_connected().await;
                    }
                    PeerEvent::Disconnected => {
                        let _ = connected_tx.send(false);
                    }
                    PeerEvent::ConnectionFailed { detail } => {
                        let _ = connected_tx.send(false);
                        warn!(object_id = %object_id, %detail, "Cloud connect attempt failed");
                    }
                    PeerEvent::AuthenticationFailed { reason } => {
                        let _ = connected_tx.send(false);
                        warn!(
                            object_id = %object_id,
                            %reason,
                            "Gateway rejected the uplink credentials - not retrying"
                        );
                    }
                }
            }
        });

        (
            CloudClientHandle {
                peer,
                connected_rx,
            },
            incoming_rx,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::framing::FrameSplitter;

    struct CountingResync {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResyncHandler for CountingResync {
        async fn on_cloud_connected(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Minimal fake gateway: welcomes each uplink, then drops it.
    async fn fake_gateway(listener: TcpListener, accept_count: usize) {
        let framing = Framing::default();
        for _ in 0..accept_count {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut splitter = FrameSplitter::new(framing.clone());
            let mut buf = [0u8; 4096];

            // Read the hello.
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                if !splitter.feed(&buf[..n]).unwrap().is_empty() {
                    break;
                }
            }

            let welcome = WireMessage::Welcome {
                object_id: "obj-1".to_string(),
                server_time: chrono::Utc::now().to_rfc3339(),
            };
            socket
                .write_all(&framing.encode_frame(&welcome.encode()).unwrap())
                .await
                .unwrap();

            // Give the client a moment to see Connected, then drop.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // The resync callback fires on the first connect AND on every
    // reconnect after an unexpected disconnect.
    #[tokio::test]
    async fn test_resync_fires_on_every_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_gateway(listener, 2));

        let resync = Arc::new(CountingResync {
            calls: AtomicUsize::new(0),
        });

        let config = CloudClientConfig {
            object_id: "obj-1".to_string(),
            gateway: addr.to_string(),
            reconnect_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (handle, _incoming) = CloudClient::spawn(config, resync.clone());

        // Wait until the second accept cycle completed.
        tokio::time::timeout(Duration::from_secs(5), async {
            while resync.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("resync should fire twice");

        assert!(resync.calls.load(Ordering::SeqCst) >= 2);
        handle.disconnect();
    }

    #[tokio::test]
    async fn test_connected_watch_tracks_link_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_gateway(listener, 1));

        let resync = Arc::new(CountingResync {
            calls: AtomicUsize::new(0),
        });

        let config = CloudClientConfig {
            object_id: "obj-1".to_string(),
            gateway: addr.to_string(),
            auto_reconnect: false,
            ..Default::default()
        };
        let (handle, _incoming) = CloudClient::spawn(config, resync);
        let mut watch_rx = handle.connected_watch();

        // Rising edge.
        watch_rx.changed().await.unwrap();
        assert!(*watch_rx.borrow());

        // Falling edge when the gateway drops us.
        watch_rx.changed().await.unwrap();
        assert!(!*watch_rx.borrow());
    }
}
