//! # History Store
//!
//! The append-only event sequence with its sync watermark.
//!
//! ## Registration and Sync Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      History Store                                      │
//! │                                                                         │
//! │  register(path, kind, payload)                                          │
//! │       │                                                                 │
//! │       ▼   (single lock, held briefly)                                   │
//! │  1. id = watermark.next_id()       strictly increasing, never reused    │
//! │  2. staged buffer push             may flush/compact per thresholds     │
//! │  3. watermark: registered, stored                                       │
//! │  4. persist watermark (best effort)                                     │
//! │                                                                         │
//! │  The sync engine reads `fetch_persisted_from(last_uploaded)` and calls  │
//! │  `mark_uploaded(batch_tail)` only after the sink acknowledged the       │
//! │  batch - a crash in between re-uploads an overlapping range, which the  │
//! │  sink deduplicates by id.                                               │
//! │                                                                         │
//! │  CORRUPTION POLICY                                                      │
//! │  ─────────────────                                                      │
//! │  Unreadable log or watermark files regenerate an empty store; ids       │
//! │  keep increasing from the last known registration so they are never     │
//! │  reused, and unsynced entries are counted as lost.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use tether_core::{EventPayload, EventRecord, Watermark};

use crate::buffer::{BufferThresholds, StagedBuffer};
use crate::error::{StoreError, StoreResult};
use crate::query::{ComponentFilter, HistoryQuery};

// =============================================================================
// Constants
// =============================================================================

/// File name of the buffer overflow log inside the store directory.
const LOG_FILE: &str = "history.log";

/// File name of the persisted watermark inside the store directory.
const WATERMARK_FILE: &str = "watermark.json";

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of the store's state for status queries.
#[derive(Debug, Clone, Copy)]
pub struct HistoryStats {
    /// Entries currently buffered in memory.
    pub buffered: usize,
    /// Entries currently in the overflow file.
    pub on_file: usize,
    /// Entries dropped before they were ever uploaded.
    pub lost: u64,
    /// Current watermark.
    pub watermark: Watermark,
    /// True when the backing file has stopped accepting writes.
    pub degraded: bool,
}

// =============================================================================
// History Store
// =============================================================================

struct StoreInner {
    buffer: StagedBuffer,
    watermark: Watermark,
}

/// Durable, bounded event store with watermark-based sync progress.
///
/// `register()` and the sync engine's batch read share the single internal
/// lock; both hold it briefly and never across I/O waits longer than a
/// local file append.
pub struct HistoryStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
}

impl HistoryStore {
    /// Opens (or creates) the store in `dir`.
    ///
    /// Corrupt files are regenerated rather than surfaced: the store always
    /// opens, possibly empty, with any unsynced entries counted as lost.
    pub fn open(dir: &Path, thresholds: BufferThresholds) -> StoreResult<Self> {
        fs::create_dir_all(dir).map_err(|e| StoreError::file(dir.display().to_string(), e))?;

        let watermark_path = dir.join(WATERMARK_FILE);
        let mut watermark = match load_watermark(&watermark_path) {
            Ok(wm) => wm,
            Err(e) => {
                warn!(error = %e, "Watermark unreadable - starting from an empty watermark");
                Watermark::new()
            }
        };

        let log_path = dir.join(LOG_FILE);
        let mut lost_on_open = 0u64;
        let buffer = match StagedBuffer::open(&log_path, thresholds) {
            Ok(buffer) => buffer,
            Err(e) => {
                // The log is unreadable; regenerate an empty one. Ids keep
                // increasing from the watermark so none is ever reused.
                warn!(error = %e, "History log corrupt - regenerating an empty store");
                if watermark.last_stored > watermark.last_uploaded {
                    lost_on_open = (watermark.last_stored - watermark.last_uploaded) as u64;
                }
                // Whatever was pending is gone; nothing is left to upload.
                watermark.last_uploaded = watermark.last_stored;
                let _ = fs::remove_file(&log_path);
                StagedBuffer::open(&log_path, thresholds)?
            }
        };

        let mut inner = StoreInner { buffer, watermark };
        inner.buffer.add_lost(lost_on_open);

        info!(
            dir = %dir.display(),
            last_registered = inner.watermark.last_registered,
            last_uploaded = inner.watermark.last_uploaded,
            "History store opened"
        );

        Ok(HistoryStore {
            dir: dir.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    /// Registers a new event, assigning the next strictly increasing id.
    pub fn register(
        &self,
        component_path: &str,
        component_kind: tether_core::ComponentKind,
        payload: EventPayload,
    ) -> StoreResult<EventRecord> {
        let mut inner = self.lock();

        let id = inner.watermark.next_id();
        let event = EventRecord {
            id,
            component_path: component_path.to_string(),
            component_kind,
            timestamp: Utc::now(),
            payload,
        };

        inner.watermark.record_registered(id)?;
        let uploaded = inner.watermark.last_uploaded;
        inner.buffer.push(event.clone(), uploaded);
        inner.watermark.record_stored(id)?;

        self.persist_watermark(&inner.watermark);

        debug!(id, path = %event.component_path, "Event registered");
        Ok(event)
    }

    /// Runs a retrieval mode against the stored sequence.
    pub fn query(&self, query: &HistoryQuery, filter: &ComponentFilter) -> Vec<EventRecord> {
        let inner = self.lock();
        let entries = inner.buffer.snapshot();
        query.apply(&entries, filter)
    }

    /// Returns stored entries with `id >= from`, ascending. `from` may be
    /// the watermark NONE sentinel (-1), which returns everything.
    pub fn fetch_persisted_from(&self, from: i64) -> Vec<EventRecord> {
        let inner = self.lock();
        inner
            .buffer
            .snapshot()
            .into_iter()
            .filter(|e| e.id >= from)
            .collect()
    }

    /// Advances the upload watermark after a successful sink call.
    pub fn mark_uploaded(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.watermark.record_uploaded(id)?;
        self.persist_watermark(&inner.watermark);
        Ok(())
    }

    /// Current watermark snapshot.
    pub fn watermark(&self) -> Watermark {
        self.lock().watermark
    }

    /// Current store statistics.
    pub fn stats(&self) -> HistoryStats {
        let inner = self.lock();
        HistoryStats {
            buffered: inner.buffer.buffered_len(),
            on_file: inner.buffer.file_len(),
            lost: inner.buffer.lost(),
            watermark: inner.watermark,
            degraded: inner.buffer.is_degraded(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned lock means another thread panicked mid-append; the
        // store state is still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persists the watermark, best effort: a failed write degrades sync
    /// resumption granularity, never the store itself.
    fn persist_watermark(&self, watermark: &Watermark) {
        let path = self.dir.join(WATERMARK_FILE);
        let tmp = self.dir.join(format!("{}.tmp", WATERMARK_FILE));

        let result = (|| -> std::io::Result<()> {
            let json = serde_json::to_string_pretty(watermark)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = result {
            warn!(error = %e, "Watermark persistence failed - sync may re-upload after restart");
        }
    }
}

fn load_watermark(path: &Path) -> StoreResult<Watermark> {
    if !path.exists() {
        return Ok(Watermark::new());
    }
    let text =
        fs::read_to_string(path).map_err(|e| StoreError::file(path.display().to_string(), e))?;
    let watermark: Watermark = serde_json::from_str(&text)
        .map_err(|e| StoreError::corrupt(path.display().to_string(), e.to_string()))?;
    if !watermark.is_consistent() {
        return Err(StoreError::corrupt(
            path.display().to_string(),
            "watermark ordering invariant violated",
        ));
    }
    Ok(watermark)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ComponentKind, WATERMARK_NONE};

    fn bool_payload() -> EventPayload {
        EventPayload::Bool {
            new: true,
            old: false,
        }
    }

    fn small_thresholds() -> BufferThresholds {
        BufferThresholds {
            buffer_max: 5,
            buffer_release: 3,
            file_max: 100,
            file_release: 50,
        }
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();

        for expected in 0..4 {
            let event = store
                .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                .unwrap();
            assert_eq!(event.id, expected);
        }

        let wm = store.watermark();
        assert_eq!(wm.last_registered, 3);
        assert_eq!(wm.last_stored, 3);
        assert_eq!(wm.last_uploaded, WATERMARK_NONE);
    }

    // Scenario: buffer max=5, release=3; six registrations leave 3 in
    // memory and put 3 on file.
    #[test]
    fn test_buffer_thresholds_apply_on_register() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();

        for _ in 0..6 {
            store
                .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                .unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.buffered, 3);
        assert_eq!(stats.on_file, 3);
    }

    #[test]
    fn test_fetch_persisted_from_none_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();

        for _ in 0..3 {
            store
                .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                .unwrap();
        }

        let all = store.fetch_persisted_from(WATERMARK_NONE);
        assert_eq!(all.len(), 3);

        let tail = store.fetch_persisted_from(2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, 2);
    }

    #[test]
    fn test_mark_uploaded_advances_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();
            for _ in 0..3 {
                store
                    .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                    .unwrap();
            }
            store.mark_uploaded(1).unwrap();
        }

        // Watermark survives a restart.
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();
        let wm = store.watermark();
        assert_eq!(wm.last_uploaded, 1);
        assert_eq!(wm.last_registered, 2);
    }

    // Idempotence property: ids are assigned once at registration, so
    // re-reading an overlapping range never yields duplicate ids.
    #[test]
    fn test_overlapping_fetch_has_no_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();

        for _ in 0..5 {
            store
                .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                .unwrap();
        }

        let first = store.fetch_persisted_from(1);
        let second = store.fetch_persisted_from(1);

        let mut ids: Vec<i64> = first.iter().chain(second.iter()).map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_corrupt_log_regenerates_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();
            for _ in 0..6 {
                store
                    .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                    .unwrap();
            }
        }

        std::fs::write(dir.path().join(LOG_FILE), "garbage\n").unwrap();

        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();
        let stats = store.stats();
        assert_eq!(stats.on_file, 0);
        // Unsynced entries were counted as lost, nothing left to upload.
        assert!(stats.lost > 0);
        assert!(stats.watermark.is_synced());

        // New registrations continue the id sequence, never reuse.
        let event = store
            .register("lamp/power", ComponentKind::BooleanState, bool_payload())
            .unwrap();
        assert_eq!(event.id, 6);
    }

    #[test]
    fn test_query_modes_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), small_thresholds()).unwrap();

        for _ in 0..4 {
            store
                .register("lamp/power", ComponentKind::BooleanState, bool_payload())
                .unwrap();
        }

        let latest = store.query(&HistoryQuery::Latest(2), &ComponentFilter::any());
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[1].id, 3);

        let page = store.query(
            &HistoryQuery::Page { number: 9, size: 4 },
            &ComponentFilter::any(),
        );
        assert!(page.is_empty());
    }
}
