//! # Gateway Probing
//!
//! A probe answers one question: does this gateway currently accept
//! connections? Probes carry a bounded timeout so an unresponsive gateway
//! can never stall the health machinery.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Pluggable availability probe.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true if the address currently accepts connections. Must
    /// complete within a bounded time.
    async fn probe(&self, addr: &str) -> bool;
}

/// Probe by TCP connect with a hard timeout.
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Creates a prober with the given per-probe timeout.
    pub fn new(timeout: Duration) -> Self {
        TcpProber { timeout }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: &str) -> bool {
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "Probe connect failed");
                false
            }
            Err(_) => {
                debug!(%addr, timeout = ?self.timeout, "Probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let prober = TcpProber::new(Duration::from_secs(1));
        assert!(prober.probe(&addr).await);
    }

    #[tokio::test]
    async fn test_probe_fails_against_closed_port() {
        let prober = TcpProber::new(Duration::from_millis(500));
        // Port 9 (discard) is a safe bet for connection refusal.
        assert!(!prober.probe("127.0.0.1:9").await);
    }
}
