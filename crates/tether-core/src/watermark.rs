//! # History Watermark
//!
//! Tracks how far the history engine has progressed through registration,
//! durable storage, and cloud upload. The invariant
//! `last_uploaded <= last_stored <= last_registered` always holds.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Sentinel id meaning "nothing yet".
pub const WATERMARK_NONE: i64 = -1;

/// Monotonically advancing ids marking storage/sync progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Highest id handed out by `register()`.
    pub last_registered: i64,

    /// Highest id durably buffered/stored.
    pub last_stored: i64,

    /// Highest id acknowledged by the cloud sink.
    pub last_uploaded: i64,
}

impl Default for Watermark {
    fn default() -> Self {
        Watermark {
            last_registered: WATERMARK_NONE,
            last_stored: WATERMARK_NONE,
            last_uploaded: WATERMARK_NONE,
        }
    }
}

impl Watermark {
    /// Fresh watermark with nothing registered, stored, or uploaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id to assign at registration.
    pub fn next_id(&self) -> i64 {
        self.last_registered + 1
    }

    /// Records a newly assigned registration id. Ids are strictly
    /// increasing and never reused.
    pub fn record_registered(&mut self, id: i64) -> CoreResult<()> {
        if id <= self.last_registered {
            return Err(CoreError::WatermarkRegression {
                field: "last_registered",
                from: self.last_registered,
                to: id,
            });
        }
        self.last_registered = id;
        Ok(())
    }

    /// Records that every event up to `id` is durably stored.
    pub fn record_stored(&mut self, id: i64) -> CoreResult<()> {
        if id < self.last_stored || id > self.last_registered {
            return Err(CoreError::WatermarkRegression {
                field: "last_stored",
                from: self.last_stored,
                to: id,
            });
        }
        self.last_stored = id;
        Ok(())
    }

    /// Records that every event up to `id` is uploaded.
    pub fn record_uploaded(&mut self, id: i64) -> CoreResult<()> {
        if id < self.last_uploaded || id > self.last_stored {
            return Err(CoreError::WatermarkRegression {
                field: "last_uploaded",
                from: self.last_uploaded,
                to: id,
            });
        }
        self.last_uploaded = id;
        Ok(())
    }

    /// Returns true when there is nothing left to upload.
    pub fn is_synced(&self) -> bool {
        self.last_uploaded == self.last_stored
    }

    /// Checks the watermark invariant.
    pub fn is_consistent(&self) -> bool {
        self.last_uploaded <= self.last_stored && self.last_stored <= self.last_registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_watermark_is_synced_and_consistent() {
        let wm = Watermark::new();
        assert!(wm.is_synced());
        assert!(wm.is_consistent());
        assert_eq!(wm.next_id(), 0);
    }

    #[test]
    fn test_normal_progression() {
        let mut wm = Watermark::new();
        wm.record_registered(0).unwrap();
        wm.record_registered(1).unwrap();
        wm.record_stored(1).unwrap();
        assert!(!wm.is_synced());
        wm.record_uploaded(1).unwrap();
        assert!(wm.is_synced());
        assert!(wm.is_consistent());
    }

    #[test]
    fn test_registered_ids_strictly_increase() {
        let mut wm = Watermark::new();
        wm.record_registered(5).unwrap();
        assert!(wm.record_registered(5).is_err());
        assert!(wm.record_registered(3).is_err());
    }

    #[test]
    fn test_stored_cannot_pass_registered() {
        let mut wm = Watermark::new();
        wm.record_registered(2).unwrap();
        assert!(wm.record_stored(3).is_err());
        wm.record_stored(2).unwrap();
    }

    #[test]
    fn test_uploaded_cannot_pass_stored() {
        let mut wm = Watermark::new();
        wm.record_registered(4).unwrap();
        wm.record_stored(2).unwrap();
        assert!(wm.record_uploaded(3).is_err());
        wm.record_uploaded(2).unwrap();
        assert!(wm.is_synced());
    }
}
