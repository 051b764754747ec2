//! # tether-link: Connection, Session, and Sync Engine
//!
//! This crate provides the object-side networking layer of Tether:
//! encrypted framed peer connections with auto-reconnect, the local
//! session server, the single cloud uplink per object, the permission
//! engine's fan-out, and the watermark-based history sync engine.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Link Layer Architecture                           │
//! │                                                                         │
//! │    local services                 cloud gateway                         │
//! │         │                              ▲                                │
//! │         ▼                              │                                │
//! │  ┌────────────────┐          ┌────────────────┐                         │
//! │  │ SessionServer  │          │  CloudClient   │                         │
//! │  │                │          │                │                         │
//! │  │ handshake,     │          │ one uplink per │                         │
//! │  │ duplicate      │          │ object, resync │                         │
//! │  │ refusal,       │          │ callback on    │                         │
//! │  │ per-session    │          │ every          │                         │
//! │  │ fan-out        │          │ (re)connect    │                         │
//! │  └───────┬────────┘          └───────┬────────┘                         │
//! │          │                           │                                  │
//! │          ▼                           ▼                                  │
//! │  ┌────────────────┐          ┌────────────────┐   ┌──────────────────┐  │
//! │  │SessionRegistry │◄─────────│PermissionEngine│   │   SyncEngine     │  │
//! │  │                │  fan-out │                │   │                  │  │
//! │  │ one live       │          │ evaluate,      │   │ watermark batch  │  │
//! │  │ session per    │          │ mutate,        │   │ upload to the    │  │
//! │  │ triple         │          │ audit          │   │ history sink     │  │
//! │  └────────────────┘          └────────────────┘   └──────────────────┘  │
//! │                                                                         │
//! │  Below everything: Peer (framed TLS stream, fixed-delay reconnect)      │
//! │  and Framing (charset + delimiter splitter).                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Transport
//! - [`framing`] - Charset + delimiter stream splitting
//! - [`protocol`] - `key=value` wire messages
//! - [`peer`] - Outbound framed connection with lifecycle and reconnect
//!
//! ### Sessions
//! - [`session`] - Session identity, registry, per-session fan-out
//! - [`server`] - The local session server
//! - [`client`] - The cloud uplink with its resync callback
//!
//! ### Engines
//! - [`engine`] - Permission evaluation, mutation, audit
//! - [`sync`] - Watermark-based history upload
//!
//! ### Ambient
//! - [`config`] - Recognized configuration surface
//! - [`discovery`] - Pluggable local-network discovery seam
//! - [`error`] - Link error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_link::{
//!     CloudClient, CloudClientConfig, LinkConfig, LinkResync, NoopDiscovery,
//!     PermissionEngine, ServerConfig, SessionRegistry, SessionServer, SyncEngine,
//! };
//! use tether_store::{HistoryStore, PermissionFileStore};
//!
//! let config = LinkConfig::load_or_default(None)?;
//! let registry = Arc::new(SessionRegistry::new());
//! let store = Arc::new(HistoryStore::open(&data_dir, config.history.thresholds())?);
//! let engine = Arc::new(PermissionEngine::new(
//!     "obj-1",
//!     None,
//!     PermissionFileStore::new(&data_dir.join("permissions.txt"), "obj-1"),
//!     registry.clone(),
//! ));
//!
//! // Local server for service sessions.
//! let (server, inbound) = SessionServer::new(ServerConfig::default())
//!     .start(registry.clone(), engine.clone(), Arc::new(NoopDiscovery))
//!     .await?;
//!
//! // Cloud uplink; reconnects trigger permission resync + history sync.
//! let (uplink, from_cloud) = CloudClient::spawn(
//!     CloudClientConfig { object_id: "obj-1".into(), gateway, ..Default::default() },
//!     Arc::new(LinkResync::new(engine.clone(), sync_handle.clone())),
//! );
//! let sync_handle = SyncEngine::spawn(store, sink, uplink.connected_watch());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Transport
pub mod framing;
pub mod peer;
pub mod protocol;

// Sessions
pub mod client;
pub mod server;
pub mod session;

// Engines
pub mod engine;
pub mod sync;

// Ambient
pub mod config;
pub mod discovery;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Transport
pub use framing::{Charset, FrameSplitter, Framing};
pub use peer::{Encryption, Peer, PeerConfig, PeerEvent, PeerHandle, PeerState, PeerStats};
pub use protocol::WireMessage;

// Sessions
pub use client::{CloudClient, CloudClientConfig, CloudClientHandle, LinkResync, ResyncHandler};
pub use server::{ServerConfig, ServerHandle, SessionServer, DEFAULT_SERVER_PORT};
pub use session::{Session, SessionKey, SessionRegistry, SessionStats};

// Engines
pub use engine::{AuditAction, AuditRecord, PermissionEngine};
pub use sync::{HistorySink, SkipReason, SyncEngine, SyncHandle, SyncOutcome};

// Ambient
pub use config::LinkConfig;
pub use discovery::{Discovery, NoopDiscovery, RecordingDiscovery, ServicePresence};
pub use error::{LinkError, LinkResult, StreamDirection};
