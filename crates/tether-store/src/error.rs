//! # Storage Error Types
//!
//! Error types for the durable layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  std::io::Error / serde_json::Error                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds the affected path and categorization   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Callers either degrade (in-memory best effort, regenerated files)      │
//! │  or surface the failure - the store itself never panics.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A durable file could not be read or written.
    ///
    /// ## When This Occurs
    /// - Data directory missing or unwritable
    /// - Disk full
    /// - Permission problems
    #[error("File error on {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A durable file exists but its contents cannot be parsed.
    ///
    /// Callers regenerate an empty store rather than crash; unsynced
    /// history in the corrupt file is counted as lost.
    #[error("Corrupt store file {path}: {detail}")]
    Corrupt { path: String, detail: String },

    /// A record failed to serialize.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A domain invariant was violated (bad watermark advance, bad record).
    #[error(transparent)]
    Domain(#[from] tether_core::CoreError),
}

impl StoreError {
    /// Creates a File error with the affected path.
    pub fn file(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::File {
            path: path.into(),
            source,
        }
    }

    /// Creates a Corrupt error with the affected path.
    pub fn corrupt(path: impl Into<String>, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
