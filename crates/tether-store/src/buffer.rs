//! # Dual-Threshold Staged Buffer
//!
//! The history store keeps recent events in memory and overflows older
//! events to an append-only file. Both stages are bounded, each by its own
//! max/release threshold pair.
//!
//! ## Overflow Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Staged Buffer Thresholds                             │
//! │                                                                         │
//! │   register ──▶ ┌──────────────────────┐                                 │
//! │                │   in-memory deque    │  len > buffer_max?              │
//! │                │   (newest events)    │  flush oldest entries until     │
//! │                └──────────┬───────────┘  buffer_release remain          │
//! │                           │ append                                      │
//! │                           ▼                                             │
//! │                ┌──────────────────────┐                                 │
//! │                │   history.log        │  len > file_max?                │
//! │                │   (JSON lines)       │  drop oldest entries until      │
//! │                └──────────────────────┘  file_release remain            │
//! │                                                                         │
//! │   Entries dropped from the file are gone permanently; any of them       │
//! │   that were never uploaded are counted as LOST.                         │
//! │                                                                         │
//! │   Example (Scenario): buffer_max=5, buffer_release=3                    │
//! │   register 6 events ──▶ 3 stay buffered, 3 land in the file             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! File write failures degrade the buffer to in-memory-only best effort;
//! they never propagate out of `push`.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use tether_core::EventRecord;

use crate::error::{StoreError, StoreResult};

// =============================================================================
// Thresholds
// =============================================================================

/// The four independent thresholds governing the staged buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferThresholds {
    /// Maximum in-memory entries before a flush is forced.
    pub buffer_max: usize,
    /// Entries left in memory after a flush.
    pub buffer_release: usize,
    /// Maximum entries in the backing file before a compaction is forced.
    pub file_max: usize,
    /// Entries left in the file after a compaction.
    pub file_release: usize,
}

impl Default for BufferThresholds {
    fn default() -> Self {
        BufferThresholds {
            buffer_max: 1_000,
            buffer_release: 500,
            file_max: 100_000,
            file_release: 50_000,
        }
    }
}

impl BufferThresholds {
    /// Validates the threshold pairs (`release <= max`, nonzero maxima).
    pub fn validate(&self) -> StoreResult<()> {
        if self.buffer_max == 0 || self.file_max == 0 {
            return Err(StoreError::corrupt(
                "thresholds",
                "buffer_max and file_max must be nonzero",
            ));
        }
        if self.buffer_release > self.buffer_max || self.file_release > self.file_max {
            return Err(StoreError::corrupt(
                "thresholds",
                "release size must not exceed max size",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Staged Buffer
// =============================================================================

/// Bounded in-memory deque backed by a bounded append-only file.
///
/// Not internally synchronized: the owning store serializes access through
/// its single lock.
#[derive(Debug)]
pub struct StagedBuffer {
    thresholds: BufferThresholds,
    log_path: PathBuf,
    buffer: VecDeque<EventRecord>,
    /// Number of entries currently in the backing file.
    file_len: usize,
    /// Entries dropped from the file before they were ever uploaded.
    lost: u64,
    /// Set when the backing file stops accepting writes; the buffer then
    /// holds everything in memory, best effort.
    degraded: bool,
}

impl StagedBuffer {
    /// Opens the buffer, scanning an existing backing file to count and
    /// validate its entries. A file that exists but cannot be parsed
    /// surfaces `StoreError::Corrupt`; the caller decides whether to
    /// regenerate.
    pub fn open(log_path: &Path, thresholds: BufferThresholds) -> StoreResult<Self> {
        thresholds.validate()?;

        let file_len = if log_path.exists() {
            let file = File::open(log_path).map_err(|e| StoreError::file(display(log_path), e))?;
            let mut count = 0usize;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| StoreError::file(display(log_path), e))?;
                if line.trim().is_empty() {
                    continue;
                }
                serde_json::from_str::<EventRecord>(&line).map_err(|e| {
                    StoreError::corrupt(
                        display(log_path),
                        format!("line {}: {}", lineno + 1, e),
                    )
                })?;
                count += 1;
            }
            count
        } else {
            0
        };

        debug!(path = %log_path.display(), entries = file_len, "History log opened");

        Ok(StagedBuffer {
            thresholds,
            log_path: log_path.to_path_buf(),
            buffer: VecDeque::new(),
            file_len,
            lost: 0,
            degraded: false,
        })
    }

    /// Appends an event, flushing and compacting per the thresholds.
    ///
    /// `uploaded_up_to` is the current upload watermark; entries at or
    /// below it that fall off the file are already safe and not counted as
    /// lost.
    pub fn push(&mut self, event: EventRecord, uploaded_up_to: i64) {
        self.buffer.push_back(event);

        if self.buffer.len() > self.thresholds.buffer_max {
            let flush_count = self.buffer.len() - self.thresholds.buffer_release;
            self.flush_oldest(flush_count);
        }

        if self.file_len > self.thresholds.file_max {
            self.compact(uploaded_up_to);
        }
    }

    /// Moves the oldest `count` buffered entries to the backing file.
    fn flush_oldest(&mut self, count: usize) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path);

        let mut file = match result {
            Ok(file) => file,
            Err(e) => {
                if !self.degraded {
                    warn!(
                        path = %self.log_path.display(),
                        error = %e,
                        "History log unwritable - degrading to in-memory buffering"
                    );
                }
                self.degraded = true;
                return;
            }
        };

        let mut flushed = 0usize;
        for _ in 0..count {
            let Some(event) = self.buffer.front() else {
                break;
            };

            let line = match serde_json::to_string(event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(id = event.id, error = %e, "Dropping unserializable event");
                    self.buffer.pop_front();
                    continue;
                }
            };

            if let Err(e) = writeln!(file, "{}", line) {
                warn!(
                    path = %self.log_path.display(),
                    error = %e,
                    "History log write failed - degrading to in-memory buffering"
                );
                self.degraded = true;
                break;
            }

            self.buffer.pop_front();
            flushed += 1;
        }

        if flushed > 0 {
            self.file_len += flushed;
            self.degraded = false;
            debug!(flushed, file_len = self.file_len, "Flushed buffer overflow to file");
        }
    }

    /// Rewrites the backing file keeping only the newest `file_release`
    /// entries. Dropped entries never uploaded are counted as lost.
    fn compact(&mut self, uploaded_up_to: i64) {
        let entries = match self.read_file_entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Compaction read failed - keeping oversized file");
                return;
            }
        };

        if entries.len() <= self.thresholds.file_release {
            self.file_len = entries.len();
            return;
        }

        let drop_count = entries.len() - self.thresholds.file_release;
        let newly_lost = entries[..drop_count]
            .iter()
            .filter(|e| e.id > uploaded_up_to)
            .count() as u64;

        let tmp_path = self.log_path.with_extension("log.tmp");
        let write_result = (|| -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            for event in &entries[drop_count..] {
                // Entries re-serialize exactly as they were read.
                let line = serde_json::to_string(event)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                writeln!(tmp, "{}", line)?;
            }
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.log_path)
        })();

        match write_result {
            Ok(()) => {
                self.file_len = entries.len() - drop_count;
                self.lost += newly_lost;
                if newly_lost > 0 {
                    warn!(
                        dropped = drop_count,
                        lost = newly_lost,
                        "History file overflow dropped entries that were never uploaded"
                    );
                } else {
                    debug!(dropped = drop_count, "Compacted history file");
                }
            }
            Err(e) => {
                warn!(error = %e, "Compaction write failed - keeping oversized file");
            }
        }
    }

    /// Reads and parses every entry in the backing file.
    pub fn read_file_entries(&self) -> StoreResult<Vec<EventRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file =
            File::open(&self.log_path).map_err(|e| StoreError::file(display(&self.log_path), e))?;
        let mut entries = Vec::with_capacity(self.file_len);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StoreError::file(display(&self.log_path), e))?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str::<EventRecord>(&line)
                .map_err(|e| StoreError::corrupt(display(&self.log_path), e.to_string()))?;
            entries.push(event);
        }
        Ok(entries)
    }

    /// Every stored entry - file overflow first, then the in-memory tail -
    /// in ascending id order. A file read failure degrades the snapshot to
    /// the in-memory entries.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        let mut entries = match self.read_file_entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "History log unreadable - answering from memory only");
                Vec::new()
            }
        };
        entries.extend(self.buffer.iter().cloned());
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Number of entries currently buffered in memory.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of entries currently in the backing file.
    pub fn file_len(&self) -> usize {
        self.file_len
    }

    /// Entries dropped before they were ever uploaded.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Adds to the lost counter (used when a corrupt store is regenerated).
    pub fn add_lost(&mut self, count: u64) {
        self.lost += count;
    }

    /// True when the backing file has stopped accepting writes.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
