//! # Discovery Capability
//!
//! The session server announces itself on the local network so services
//! can find the object without configuration. Concrete backends (mDNS,
//! UDP broadcast, registries) are pluggable and live outside this crate;
//! the core only speaks this trait.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LinkResult;

/// What a published object looks like to the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePresence {
    /// Object being announced.
    pub object_id: String,
    /// Address of the session server.
    pub addr: SocketAddr,
}

/// Pluggable local-network discovery backend.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Announces the session server. Called once at server start.
    async fn publish(&self, presence: &ServicePresence) -> LinkResult<()>;

    /// Withdraws the announcement. Called at server stop; idempotent.
    async fn deregister(&self) -> LinkResult<()>;
}

/// Discovery backend that announces nothing (tests, manual addressing).
pub struct NoopDiscovery;

#[async_trait]
impl Discovery for NoopDiscovery {
    async fn publish(&self, presence: &ServicePresence) -> LinkResult<()> {
        debug!(object_id = %presence.object_id, addr = %presence.addr, "Discovery disabled - not publishing");
        Ok(())
    }

    async fn deregister(&self) -> LinkResult<()> {
        Ok(())
    }
}

/// Discovery stub that records calls, for wiring tests.
#[derive(Default)]
pub struct RecordingDiscovery {
    published: std::sync::Mutex<Vec<ServicePresence>>,
    deregistered: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl Discovery for RecordingDiscovery {
    async fn publish(&self, presence: &ServicePresence) -> LinkResult<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(presence.clone());
        Ok(())
    }

    async fn deregister(&self) -> LinkResult<()> {
        self.deregistered
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

impl RecordingDiscovery {
    /// Presences published so far.
    pub fn published(&self) -> Vec<ServicePresence> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of deregister calls.
    pub fn deregister_count(&self) -> usize {
        self.deregistered.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_discovery_tracks_calls() {
        let discovery = RecordingDiscovery::default();
        let presence = ServicePresence {
            object_id: "obj-1".to_string(),
            addr: "127.0.0.1:9000".parse().unwrap(),
        };

        discovery.publish(&presence).await.unwrap();
        discovery.deregister().await.unwrap();
        discovery.deregister().await.unwrap();

        assert_eq!(discovery.published(), vec![presence]);
        assert_eq!(discovery.deregister_count(), 2);
    }
}
