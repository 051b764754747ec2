//! # Gateway Registry & Health Monitor
//!
//! Cloud-side bookkeeping of gateway instances.
//!
//! ## Health Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Gateway Health Lifecycle                             │
//! │                                                                         │
//! │  register(id, info) ──▶ upsert record ──▶ probe immediately             │
//! │  (reloaded records get the same treatment at startup)                   │
//! │                                                                         │
//! │        probe ok                     probe failed                        │
//! │           │                              │                              │
//! │           ▼                              ▼                              │
//! │   online = true                 online = false                          │
//! │   attempts = 0                  attempts += 1                           │
//! │   cancel timer                  start per-gateway fixed-delay timer     │
//! │   (idempotent)                       │                                  │
//! │                                      ▼                                  │
//! │                        every tick: re-probe                             │
//! │                        failure: attempts += 1                           │
//! │                        attempts > max ──▶ REMOVE:                       │
//! │                          • delete the record                            │
//! │                          • close the gateway's uplink connection        │
//! │                          • removed counter += 1                         │
//! │                          • cancel the timer (never leaks)               │
//! │                                                                         │
//! │  get_available(kind): first REGISTERED gateway of that kind that        │
//! │  passes a live probe; error when none do.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is explicitly owned and passed through construction; timer
//! handles live in its own map, cancelled on success or removal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::probe::Prober;

// =============================================================================
// Gateway Kind
// =============================================================================

/// Traffic direction a gateway brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Object-to-service traffic.
    Obj2Srv,
    /// Service-to-object traffic.
    Srv2Obj,
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayKind::Obj2Srv => write!(f, "obj2srv"),
            GatewayKind::Srv2Obj => write!(f, "srv2obj"),
        }
    }
}

// =============================================================================
// Gateway Record
// =============================================================================

/// Startup information a gateway reports when registering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStartupInfo {
    /// Addresses the gateway accepts connections on (`host:port`).
    pub addresses: Vec<String>,
    /// Maximum clients the gateway accepts.
    pub max_clients: u32,
}

/// One registered gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRecord {
    /// Gateway id.
    pub id: String,
    /// Traffic direction.
    pub kind: GatewayKind,
    /// Addresses the gateway accepts connections on.
    pub addresses: Vec<String>,
    /// Maximum clients.
    pub max_clients: u32,
    /// Result of the most recent probe.
    pub online: bool,
    /// Consecutive failed probes.
    pub attempts: u32,
    /// When the record was created.
    pub registered_at: DateTime<Utc>,
    /// Last time a client connected through this gateway.
    pub last_client_connected: Option<DateTime<Utc>>,
    /// Last time a client disconnected.
    pub last_client_disconnected: Option<DateTime<Utc>>,
    /// Clients that ever connected through this gateway.
    pub total_clients: u64,
}

impl GatewayRecord {
    /// Creates a fresh record from startup info.
    pub fn new(id: &str, kind: GatewayKind, info: GatewayStartupInfo) -> Self {
        GatewayRecord {
            id: id.to_string(),
            kind,
            addresses: info.addresses,
            max_clients: info.max_clients,
            online: false,
            attempts: 0,
            registered_at: Utc::now(),
            last_client_connected: None,
            last_client_disconnected: None,
            total_clients: 0,
        }
    }
}

// =============================================================================
// Configuration & Stats
// =============================================================================

/// Health monitor configuration.
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    /// Fixed delay between re-probes of a failing gateway.
    pub check_delay: Duration,
    /// Failed probes tolerated; exceeding this removes the gateway.
    pub max_attempts: u32,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            check_delay: Duration::from_secs(30),
            max_attempts: 10,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Registry statistics for status queries.
#[derive(Debug, Clone, Copy)]
pub struct BrokerStats {
    /// Currently registered gateways.
    pub registered: usize,
    /// Gateways ever registered since startup.
    pub total_registered: u64,
    /// Gateways removed after exhausting their retry budget.
    pub total_removed: u64,
}

// =============================================================================
// Internal Table
// =============================================================================

/// Records plus registration order (selection prefers earlier gateways).
#[derive(Default)]
struct GatewayTable {
    records: HashMap<String, GatewayRecord>,
    order: Vec<String>,
}

impl GatewayTable {
    fn upsert(&mut self, record: GatewayRecord) -> bool {
        let is_new = !self.records.contains_key(&record.id);
        if is_new {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
        is_new
    }

    fn remove(&mut self, id: &str) -> Option<GatewayRecord> {
        self.order.retain(|existing| existing != id);
        self.records.remove(id)
    }

    fn ids_in_order(&self) -> Vec<String> {
        self.order.clone()
    }
}

// =============================================================================
// Registry
// =============================================================================

struct RegistryInner {
    config: HealthConfig,
    prober: Arc<dyn Prober>,
    table: RwLock<GatewayTable>,
    /// One health timer per currently-failing gateway.
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Close signal for each gateway's uplink connection.
    clients: Mutex<HashMap<String, mpsc::Sender<()>>>,
    total_registered: AtomicU64,
    total_removed: AtomicU64,
}

/// Cloud-side registry of gateway instances with health monitoring.
#[derive(Clone)]
pub struct GatewayRegistry {
    inner: Arc<RegistryInner>,
}

impl GatewayRegistry {
    /// Creates a registry with the given health config and prober.
    pub fn new(config: HealthConfig, prober: Arc<dyn Prober>) -> Self {
        GatewayRegistry {
            inner: Arc::new(RegistryInner {
                config,
                prober,
                table: RwLock::new(GatewayTable::default()),
                timers: Mutex::new(HashMap::new()),
                clients: Mutex::new(HashMap::new()),
                total_registered: AtomicU64::new(0),
                total_removed: AtomicU64::new(0),
            }),
        }
    }

    /// Upserts a gateway and probes it immediately. Returns the probe
    /// result.
    pub async fn register(
        &self,
        id: &str,
        kind: GatewayKind,
        info: GatewayStartupInfo,
    ) -> bool {
        let record = GatewayRecord::new(id, kind, info);
        let is_new = self.inner.table.write().await.upsert(record);
        if is_new {
            self.inner.total_registered.fetch_add(1, Ordering::Relaxed);
        }
        info!(gateway = id, %kind, new = is_new, "Gateway registered");

        probe_and_track(&self.inner, id, true).await.unwrap_or(false)
    }

    /// Re-registers records reloaded from storage at startup, probing each
    /// the same way `register` does.
    pub async fn load_records(&self, records: Vec<GatewayRecord>) {
        for mut record in records {
            // Reloaded state is stale by definition.
            record.online = false;
            record.attempts = 0;
            let id = record.id.clone();
            let is_new = self.inner.table.write().await.upsert(record);
            if is_new {
                self.inner.total_registered.fetch_add(1, Ordering::Relaxed);
            }
            debug!(gateway = %id, "Gateway reloaded from storage");
            let _ = probe_and_track(&self.inner, &id, true).await;
        }
    }

    /// Attaches the close signal of the gateway's uplink connection;
    /// removal fires it.
    pub async fn attach_client(&self, id: &str, close_tx: mpsc::Sender<()>) {
        self.inner.clients.lock().await.insert(id.to_string(), close_tx);
    }

    /// Returns the first registered gateway of the requested kind that
    /// currently passes a probe.
    pub async fn get_available(&self, kind: GatewayKind) -> BrokerResult<GatewayRecord> {
        let candidates: Vec<String> = {
            let table = self.inner.table.read().await;
            table
                .ids_in_order()
                .into_iter()
                .filter(|id| table.records.get(id).map(|r| r.kind) == Some(kind))
                .collect()
        };

        for id in candidates {
            // Selection probes update the online flag but never the retry
            // budget; only the health timer consumes attempts.
            if probe_and_track(&self.inner, &id, false).await == Some(true) {
                if let Some(record) = self.gateway(&id).await {
                    return Ok(record);
                }
            }
        }

        Err(BrokerError::NoneAvailable { kind })
    }

    /// Returns a gateway record snapshot.
    pub async fn gateway(&self, id: &str) -> Option<GatewayRecord> {
        self.inner.table.read().await.records.get(id).cloned()
    }

    /// Registry statistics.
    pub async fn stats(&self) -> BrokerStats {
        BrokerStats {
            registered: self.inner.table.read().await.records.len(),
            total_registered: self.inner.total_registered.load(Ordering::Relaxed),
            total_removed: self.inner.total_removed.load(Ordering::Relaxed),
        }
    }

    /// Stamps a client connect on the gateway record.
    pub async fn note_client_connected(&self, id: &str) -> BrokerResult<()> {
        let mut table = self.inner.table.write().await;
        let record = table
            .records
            .get_mut(id)
            .ok_or_else(|| BrokerError::UnknownGateway(id.to_string()))?;
        record.last_client_connected = Some(Utc::now());
        record.total_clients += 1;
        Ok(())
    }

    /// Stamps a client disconnect on the gateway record.
    pub async fn note_client_disconnected(&self, id: &str) -> BrokerResult<()> {
        let mut table = self.inner.table.write().await;
        let record = table
            .records
            .get_mut(id)
            .ok_or_else(|| BrokerError::UnknownGateway(id.to_string()))?;
        record.last_client_disconnected = Some(Utc::now());
        Ok(())
    }

    /// Number of live health timers (should be zero once every gateway is
    /// healthy or removed).
    pub async fn active_timer_count(&self) -> usize {
        let mut timers = self.inner.timers.lock().await;
        timers.retain(|_, handle| !handle.is_finished());
        timers.len()
    }

    /// Cancels every health timer. Idempotent.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.lock().await;
        for (id, handle) in timers.drain() {
            debug!(gateway = %id, "Cancelling health timer on shutdown");
            handle.abort();
        }
    }
}

// =============================================================================
// Probe / Timer Machinery
// =============================================================================

/// Probes a gateway and applies the outcome. Returns `None` when the
/// record no longer exists. `count_failure` is true on the health path
/// (registration and timer ticks), false for selection probes.
async fn probe_and_track(
    inner: &Arc<RegistryInner>,
    id: &str,
    count_failure: bool,
) -> Option<bool> {
    let addresses = {
        let table = inner.table.read().await;
        table.records.get(id)?.addresses.clone()
    };

    let mut online = false;
    for addr in &addresses {
        if inner.prober.probe(addr).await {
            online = true;
            break;
        }
    }

    if online {
        {
            let mut table = inner.table.write().await;
            let record = table.records.get_mut(id)?;
            record.online = true;
            record.attempts = 0;
        }
        cancel_timer(inner, id).await;
        debug!(gateway = id, "Gateway probe ok");
        return Some(true);
    }

    // Probe failed.
    let attempts = {
        let mut table = inner.table.write().await;
        let record = table.records.get_mut(id)?;
        record.online = false;
        if count_failure {
            record.attempts += 1;
        }
        record.attempts
    };

    if count_failure && attempts > inner.config.max_attempts {
        warn!(
            gateway = id,
            attempts,
            max = inner.config.max_attempts,
            "Gateway exceeded its retry budget - removing"
        );
        remove_gateway(inner, id).await;
        return Some(false);
    }

    debug!(gateway = id, attempts, "Gateway probe failed");
    ensure_timer(inner, id).await;
    Some(false)
}

/// Starts the per-gateway health timer unless one is already running.
///
/// Returns a boxed `Send` future. The explicit boxing breaks the cyclic
/// `Send` inference created by the mutual recursion
/// `probe_and_track` -> `ensure_timer` -> spawned task -> `probe_and_track`,
/// which rustc cannot otherwise resolve.
fn ensure_timer<'a>(
    inner: &'a Arc<RegistryInner>,
    id: &'a str,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let mut timers = inner.timers.lock().await;

        if let Some(handle) = timers.get(id) {
            if !handle.is_finished() {
                return;
            }
        }

        debug!(gateway = id, delay = ?inner.config.check_delay, "Starting health timer");

        let task_inner = inner.clone();
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(task_inner.config.check_delay).await;
                match probe_and_track(&task_inner, &task_id, true).await {
                    // Healthy again or removed: this timer's job is done.
                    // (probe_and_track cancelled/aborted it already; exiting
                    // here covers the self-abort race.)
                    Some(true) | None => break,
                    Some(false) => {
                        // Still failing; if the gateway got removed inside
                        // probe_and_track the next iteration sees None.
                        if task_inner.table.read().await.records.get(&task_id).is_none() {
                            break;
                        }
                    }
                }
            }
        });

        timers.insert(id.to_string(), handle);
    })
}

/// Cancels a gateway's health timer. Idempotent: missing or finished
/// timers are fine.
async fn cancel_timer(inner: &Arc<RegistryInner>, id: &str) {
    let handle = inner.timers.lock().await.remove(id);
    if let Some(handle) = handle {
        handle.abort();
        debug!(gateway = id, "Health timer cancelled");
    }
}

/// Permanently removes a gateway: record deleted, uplink closed, removed
/// counter bumped, timer cancelled.
async fn remove_gateway(inner: &Arc<RegistryInner>, id: &str) {
    let removed = inner.table.write().await.remove(id);
    if removed.is_none() {
        return;
    }

    if let Some(close_tx) = inner.clients.lock().await.remove(id) {
        let _ = close_tx.try_send(());
    }

    inner.total_removed.fetch_add(1, Ordering::Relaxed);
    cancel_timer(inner, id).await;
    info!(gateway = id, "Gateway removed");
}

// =============================================================================
// Tests
// =============================================================================
