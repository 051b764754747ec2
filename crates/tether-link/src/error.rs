//! # Link Error Types
//!
//! Error types for connections, sessions, and sync.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Link Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │   Credentials   │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Connection     │  │  Authentication │  │  Request                │ │
//! │  │  Stream (I/O)   │  │                 │  │  Response               │ │
//! │  │  UnknownHost    │  │                 │  │                         │ │
//! │  │  Timeout        │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Lifecycle     │  │    Sessions     │  │      Wrapped            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidState   │  │  DuplicateSess  │  │  Store, Domain          │ │
//! │  │  ServerStartup  │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Only Connection/Stream/Timeout drive auto-reconnect; an               │
//! │  Authentication rejection is surfaced and never blindly retried.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Direction of a failed stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Reading from the peer failed.
    Input,
    /// Writing to the peer failed.
    Output,
}

impl std::fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamDirection::Input => write!(f, "input"),
            StreamDirection::Output => write!(f, "output"),
        }
    }
}

/// Link error type covering connection, session, and sync failures.
#[derive(Debug, Error)]
pub enum LinkError {
    // =========================================================================
    // Transport Errors (transient, drive auto-reconnect)
    // =========================================================================
    /// Failed to establish or keep a connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A stream operation failed in one direction.
    #[error("Stream {direction} error: {detail}")]
    Stream {
        direction: StreamDirection,
        detail: String,
    },

    /// Operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Hostname did not resolve to any address.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    // =========================================================================
    // Credential Errors (surfaced, never blindly retried)
    // =========================================================================
    /// The remote end rejected our credentials.
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    // =========================================================================
    // Protocol Errors (logged, operation fails, no corruption)
    // =========================================================================
    /// A malformed request frame arrived.
    #[error("Invalid request: {0}")]
    Request(String),

    /// A malformed response frame arrived.
    #[error("Invalid response: {0}")]
    Response(String),

    // =========================================================================
    // Lifecycle Errors (fail fast)
    // =========================================================================
    /// An operation was invoked in the wrong lifecycle state.
    #[error("Operation '{operation}' invalid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// The session server failed to bind its listener.
    #[error("Server startup failed on {addr}: {detail}")]
    ServerStartup { addr: String, detail: String },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A second connection arrived for an already-connected identity.
    #[error("Session already connected for {service_id}/{user_id}/{instance_id}")]
    DuplicateSession {
        service_id: String,
        user_id: String,
        instance_id: String,
    },

    /// The requester lacks the permission level an operation needs.
    /// Distinct from "object not connected" (an InvalidState on the
    /// uplink) so callers can surface the right message.
    #[error("Missing permission: {service_id}/{user_id} needs {required}")]
    PermissionDenied {
        service_id: String,
        user_id: String,
        required: tether_core::PermissionLevel,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A channel to a background task is gone.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Text could not be encoded/decoded with the configured charset.
    #[error("Charset error: {0}")]
    Charset(String),

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// Durable layer failure.
    #[error(transparent)]
    Store(#[from] tether_store::StoreError),

    /// Domain invariant failure.
    #[error(transparent)]
    Domain(#[from] tether_core::CoreError),
}

// =============================================================================
// Error Categorization (drives the reconnect policy)
// =============================================================================

impl LinkError {
    /// Returns true if this error is transient and the connection may be
    /// retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Connection(_) | LinkError::Stream { .. } | LinkError::Timeout(_)
        )
    }

    /// Returns true if this error means the protocol exchange itself was
    /// malformed.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, LinkError::Request(_) | LinkError::Response(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(LinkError::Connection("refused".into()).is_retryable());
        assert!(LinkError::Timeout(10).is_retryable());
        assert!(LinkError::Stream {
            direction: StreamDirection::Input,
            detail: "reset".into()
        }
        .is_retryable());

        assert!(!LinkError::Authentication("bad key".into()).is_retryable());
        assert!(!LinkError::UnknownHost("nowhere.local".into()).is_retryable());
        assert!(!LinkError::Request("garbage".into()).is_retryable());
    }

    #[test]
    fn test_stream_direction_display() {
        let err = LinkError::Stream {
            direction: StreamDirection::Output,
            detail: "broken pipe".into(),
        };
        assert!(err.to_string().contains("output"));
    }
}
