//! # tether-store: Durable History and Permission Storage
//!
//! This crate owns every byte Tether writes to disk: the bounded,
//! file-backed history buffer with its sync watermark, and the
//! newline-delimited permission record files.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Storage Layer                                    │
//! │                                                                         │
//! │  tether-link (register events, sync engine, permission manager)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tether-store (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌────────────────────────┐  │   │
//! │  │  │ StagedBuffer│  │ HistoryStore│  │ PermissionFileStore    │  │   │
//! │  │  │ (buffer.rs) │  │ (history.rs)│  │ (permissions.rs)       │  │   │
//! │  │  │             │  │             │  │                        │  │   │
//! │  │  │ dual        │◄─│ id assign,  │  │ wholesale replace,     │  │   │
//! │  │  │ threshold   │  │ watermark,  │  │ stale identity         │  │   │
//! │  │  │ overflow    │  │ queries     │  │ rewrite                │  │   │
//! │  │  └─────────────┘  └─────────────┘  └────────────────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  history.log / watermark.json / permissions.txt                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`buffer`] - Dual-threshold in-memory deque with file overflow
//! - [`history`] - The event store: registration, queries, watermark
//! - [`query`] - The five retrieval modes
//! - [`permissions`] - Permission record file persistence
//! - [`error`] - Storage error types
//!
//! ## Failure Policy
//!
//! The store degrades, it does not crash: unreadable files regenerate
//! empty (unsynced entries counted as lost), unwritable files fall back to
//! in-memory best effort. Event ids are never reused across regeneration.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod buffer;
pub mod error;
pub mod history;
pub mod permissions;
pub mod query;

// =============================================================================
// Re-exports
// =============================================================================

pub use buffer::{BufferThresholds, StagedBuffer};
pub use error::{StoreError, StoreResult};
pub use history::{HistoryStats, HistoryStore};
pub use permissions::PermissionFileStore;
pub use query::{ComponentFilter, HistoryQuery};
