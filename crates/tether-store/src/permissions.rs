//! # Permission Record Persistence
//!
//! The object's permission list persists as a newline-delimited record
//! file (`id,objectId,serviceId,userId,level,scope,updatedAt` per line).
//! Saves replace the file wholesale (write temp + rename) because rule
//! mutation replaces records wholesale, never edits in place.
//!
//! ## Stale Identity Rewrite
//! When a loaded record references an object id other than the current
//! one (the object was re-provisioned under a new identity), every record
//! is rewritten to the current identity and saved back, instead of
//! aborting the load.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use tether_core::PermissionRecord;

use crate::error::{StoreError, StoreResult};

/// Loads and saves an object's permission record file.
pub struct PermissionFileStore {
    path: PathBuf,
    object_id: String,
}

impl PermissionFileStore {
    /// Creates a store for the given object writing to `path`.
    pub fn new(path: &Path, object_id: &str) -> Self {
        PermissionFileStore {
            path: path.to_path_buf(),
            object_id: object_id.to_string(),
        }
    }

    /// Saves the full record list, replacing the file.
    pub fn save(&self, records: &[PermissionRecord]) -> StoreResult<()> {
        let tmp = self.path.with_extension("txt.tmp");

        let mut file =
            File::create(&tmp).map_err(|e| StoreError::file(self.path_display(), e))?;
        for record in records {
            writeln!(file, "{}", record.to_line())
                .map_err(|e| StoreError::file(self.path_display(), e))?;
        }
        file.sync_all()
            .map_err(|e| StoreError::file(self.path_display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::file(self.path_display(), e))?;

        debug!(count = records.len(), path = %self.path.display(), "Permission list saved");
        Ok(())
    }

    /// Loads the record list.
    ///
    /// - Missing file: empty list.
    /// - Unparseable file: regenerated empty (the rule list is gone, the
    ///   object falls back to its owner-driven defaults upstream).
    /// - Stale object identity: all records rewritten to the current
    ///   identity and saved back.
    pub fn load(&self) -> Vec<PermissionRecord> {
        if !self.path.exists() {
            return Vec::new();
        }

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Permission file unreadable - starting empty");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match PermissionRecord::from_line(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Permission file corrupt - regenerating empty list"
                    );
                    if let Err(e) = self.save(&[]) {
                        warn!(error = %e, "Failed to regenerate permission file");
                    }
                    return Vec::new();
                }
            }
        }

        if records.iter().any(|r| r.object_id != self.object_id) {
            records = self.rewrite_identity(records);
        }

        records
    }

    /// Rewrites every record to the current object identity and persists
    /// the rewritten list.
    fn rewrite_identity(&self, records: Vec<PermissionRecord>) -> Vec<PermissionRecord> {
        let stale: Vec<&str> = records
            .iter()
            .filter(|r| r.object_id != self.object_id)
            .map(|r| r.object_id.as_str())
            .collect();
        info!(
            object_id = %self.object_id,
            stale_count = stale.len(),
            "Permission records reference a stale object identity - rewriting"
        );

        let rewritten: Vec<PermissionRecord> = records
            .into_iter()
            .map(|mut r| {
                r.object_id = self.object_id.clone();
                r
            })
            .collect();

        if let Err(e) = self.save(&rewritten) {
            warn!(error = %e, "Failed to persist rewritten permission records");
        }

        rewritten
    }

    fn path_display(&self) -> String {
        self.path.display().to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
