//! # tether-broker: Cloud-Side Gateway Registry
//!
//! Bookkeeping of gateway instances on the cloud side: registration,
//! periodic health probing with bounded-retry removal, and gateway
//! selection for brokering object/service connections.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Cloud Side                                        │
//! │                                                                         │
//! │  gateway processes ──register──▶ ┌───────────────────────────────────┐  │
//! │  (Obj2Srv / Srv2Obj)             │  GatewayRegistry (THIS CRATE)     │  │
//! │                                  │                                   │  │
//! │  objects asking for ──select──▶  │  • upsert + immediate probe       │  │
//! │  an uplink address               │  • per-gateway health timers      │  │
//! │                                  │  • bounded-retry removal          │  │
//! │                                  │  • first-passing selection        │  │
//! │                                  └───────────────────────────────────┘  │
//! │                                                                         │
//! │  Probes are TCP connects with a hard timeout; an unresponsive           │
//! │  gateway can never stall the timer machinery.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`] - Gateway records, registry, health timers, selection
//! - [`probe`] - The pluggable availability probe
//! - [`error`] - Broker error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_broker::{GatewayKind, GatewayRegistry, GatewayStartupInfo, HealthConfig, TcpProber};
//!
//! let registry = GatewayRegistry::new(
//!     HealthConfig::default(),
//!     Arc::new(TcpProber::new(Duration::from_secs(5))),
//! );
//!
//! registry.register("gw-1", GatewayKind::Obj2Srv, GatewayStartupInfo {
//!     addresses: vec!["gw1.example.com:8473".into()],
//!     max_clients: 512,
//! }).await;
//!
//! // Pick a live gateway when brokering a new connection.
//! let gateway = registry.get_available(GatewayKind::Obj2Srv).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod probe;
pub mod registry;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{BrokerError, BrokerResult};
pub use probe::{Prober, TcpProber};
pub use registry::{
    BrokerStats, GatewayKind, GatewayRecord, GatewayRegistry, GatewayStartupInfo, HealthConfig,
};
