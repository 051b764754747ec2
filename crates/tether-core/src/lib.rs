//! # tether-core: Pure Domain Logic for Tether
//!
//! This crate is the **heart** of Tether. It contains the permission model,
//! the component/event model, and the sync watermark as pure types and
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tether Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tether-link (Networking)                        │   │
//! │  │   Peers ──► Sessions ──► Permission fan-out ──► History sync    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tether-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │permission │  │ component │  │   event   │  │ watermark │  │   │
//! │  │   │  records  │  │   kinds   │  │  records  │  │  progress │  │   │
//! │  │   │evaluation │  │  presets  │  │   codec   │  │ invariant │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SOCKETS • NO FILES • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tether-store (Durable Layer)                    │   │
//! │  │          buffered history log, permission record files          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`permission`] - Permission records, selectors, and pure evaluation
//! - [`component`] - Component descriptors with kind tags and range presets
//! - [`event`] - State/action events and the `new`/`old` wire codec
//! - [`watermark`] - Storage/upload progress with its ordering invariant
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Socket, file system, and timer access is FORBIDDEN here
//! 3. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use tether_core::permission::{
//!     check_permission, AccessRequest, ConnScope, PermissionLevel,
//! };
//!
//! // An unclaimed object (no owner) grants open access at CoOwner level.
//! let request = AccessRequest {
//!     service_id: "srv-1",
//!     user_id: "usr-1",
//!     channel: ConnScope::OnlyLocal,
//! };
//! assert!(check_permission(&[], None, request, PermissionLevel::CoOwner));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod component;
pub mod error;
pub mod event;
pub mod permission;
pub mod watermark;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use tether_core::PermissionRecord` instead of
// `use tether_core::permission::PermissionRecord`

pub use component::{ComponentDescriptor, ComponentKind, RangeSpec};
pub use error::{CoreError, CoreResult};
pub use event::{EventPayload, EventRecord};
pub use permission::{
    check_permission, service_permission, AccessRequest, ConnScope, PermissionLevel,
    PermissionRecord, ServiceSelector, UserSelector,
};
pub use watermark::{Watermark, WATERMARK_NONE};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Wire protocol version spoken by peers built against this crate.
pub const PROTOCOL_VERSION: u32 = 1;
