//! # History Sync Engine
//!
//! Uploads stored events to the cloud history sink, resuming from the
//! persisted watermark.
//!
//! ## Sync Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Watermark Sync                                     │
//! │                                                                         │
//! │  sync() is a no-op when lastUploaded == lastStored or the cloud link    │
//! │  is down. Otherwise:                                                    │
//! │                                                                         │
//! │  1. Fetch stored entries with id >= lastUploaded (inclusive fetch)      │
//! │  2. Emulate the exclusive lower bound: when more than one entry came    │
//! │     back, lastUploaded != NONE, and the first entry IS the already-     │
//! │     uploaded one, drop it                                               │
//! │  3. Upload the whole batch in ONE sink call                             │
//! │  4. Advance lastUploaded to the batch tail only AFTER the sink          │
//! │     acknowledged                                                        │
//! │                                                                         │
//! │  AT-LEAST-ONCE: a crash between upload success and watermark            │
//! │  persistence re-uploads an overlapping range; the sink deduplicates     │
//! │  by event id (ids are assigned once, at registration).                  │
//! │                                                                         │
//! │  TRIGGERS                                                              │
//! │  ────────                                                              │
//! │  • cloud link (re)connect                                              │
//! │  • every newly registered event (effective per-event latency while     │
//! │    the link is up)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tether_core::{ComponentKind, EventPayload, EventRecord, WATERMARK_NONE};
use tether_store::{HistoryStore, StoreResult};

use crate::error::LinkResult;
use crate::session::SessionRegistry;

// =============================================================================
// History Sink
// =============================================================================

/// The external history-ingest endpoint.
///
/// The contract is idempotent-by-id: re-uploading an overlapping batch
/// after a crash must not create duplicates downstream.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Uploads one ordered batch in a single call.
    async fn upload_batch(&self, batch: &[EventRecord]) -> LinkResult<()>;
}

// =============================================================================
// Sync Outcome
// =============================================================================

/// Why a sync cycle did not upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The cloud link is down.
    LinkDown,
    /// Everything stored is already uploaded.
    UpToDate,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Preconditions not met; nothing attempted.
    Skipped(SkipReason),
    /// The pending range turned out empty (entries were dropped as lost).
    Nothing,
    /// A batch was uploaded and the watermark advanced.
    Uploaded { count: usize, up_to: i64 },
}

// =============================================================================
// One Sync Cycle
// =============================================================================

/// Runs one sync cycle against the store and sink.
pub async fn sync_once(
    store: &HistoryStore,
    sink: &dyn HistorySink,
    connected: bool,
) -> LinkResult<SyncOutcome> {
    if !connected {
        return Ok(SyncOutcome::Skipped(SkipReason::LinkDown));
    }

    let watermark = store.watermark();
    if watermark.is_synced() {
        return Ok(SyncOutcome::Skipped(SkipReason::UpToDate));
    }

    // Inclusive fetch from the upload watermark, then drop the leading
    // already-uploaded entry when it is actually present (it may have been
    // dropped by file overflow in the meantime).
    let mut batch = store.fetch_persisted_from(watermark.last_uploaded);
    if batch.len() > 1
        && watermark.last_uploaded != WATERMARK_NONE
        && batch[0].id == watermark.last_uploaded
    {
        batch.remove(0);
    }

    if batch.is_empty() {
        debug!("Pending range is empty after overflow drops");
        return Ok(SyncOutcome::Nothing);
    }

    let count = batch.len();
    let up_to = batch[count - 1].id;

    sink.upload_batch(&batch).await?;
    store.mark_uploaded(up_to)?;

    info!(count, up_to, "History batch uploaded");
    Ok(SyncOutcome::Uploaded { count, up_to })
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Handle for feeding and nudging the sync engine.
#[derive(Clone)]
pub struct SyncHandle {
    store: Arc<HistoryStore>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncHandle {
    /// Registers a state/action event, fans it out to connected sessions
    /// granted at least Status, and nudges the sync loop.
    pub async fn publish(
        &self,
        registry: &SessionRegistry,
        component_path: &str,
        component_kind: ComponentKind,
        payload: EventPayload,
    ) -> StoreResult<EventRecord> {
        let event = self
            .store
            .register(component_path, component_kind, payload)?;
        registry.fan_out_event(&event).await;
        self.trigger();
        Ok(event)
    }

    /// Nudges the sync loop; coalesced, never blocks.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Stops the engine task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Background task running sync cycles on (re)connect and registration.
pub struct SyncEngine {
    store: Arc<HistoryStore>,
    sink: Arc<dyn HistorySink>,
    connected_rx: watch::Receiver<bool>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncEngine {
    /// Creates the engine and spawns its task.
    ///
    /// `connected_rx` is the cloud client's connectivity watch; every
    /// rising edge runs a sync cycle.
    pub fn spawn(
        store: Arc<HistoryStore>,
        sink: Arc<dyn HistorySink>,
        connected_rx: watch::Receiver<bool>,
    ) -> SyncHandle {
        // Capacity 1: rapid registrations coalesce into one pending cycle.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let engine = SyncEngine {
            store: store.clone(),
            sink,
            connected_rx,
            trigger_rx,
            shutdown_rx,
        };
        tokio::spawn(engine.run());

        SyncHandle {
            store,
            trigger_tx,
            shutdown_tx,
        }
    }

    async fn run(mut self) {
        info!("History sync engine starting");

        loop {
            tokio::select! {
                Some(()) = self.trigger_rx.recv() => {
                    self.cycle().await;
                }

                changed = self.connected_rx.changed() => {
                    if changed.is_err() {
                        // Cloud client gone; nothing will flip the link up again.
                        break;
                    }
                    if *self.connected_rx.borrow() {
                        debug!("Cloud link up - running sync");
                        self.cycle().await;
                    }
                }

                _ = self.shutdown_rx.recv() => break,
            }
        }

        info!("History sync engine stopped");
    }

    async fn cycle(&self) {
        let connected = *self.connected_rx.borrow();
        match sync_once(&self.store, self.sink.as_ref(), connected).await {
            Ok(_) => {}
            Err(e) => {
                // The watermark did not advance; the next trigger or
                // reconnect retries the same range.
                warn!(error = %e, "History sync failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
