//! # Domain Error Types
//!
//! Error types for the pure domain layer. Everything here is produced by
//! parsing, validation, or invariant checks - never by I/O.

use thiserror::Error;

/// Result type alias for domain operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Domain error type covering parsing and invariant failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    // =========================================================================
    // Permission Errors
    // =========================================================================
    /// A serialized permission record could not be parsed.
    #[error("Invalid permission record: {0}")]
    InvalidPermissionRecord(String),

    /// Unknown permission level token.
    #[error("Unknown permission level: '{0}'. Valid options: none, status, actions, coowner")]
    InvalidPermissionLevel(String),

    /// Unknown connection scope token.
    #[error("Unknown connection scope: '{0}'. Valid options: only_local, local_and_cloud")]
    InvalidConnScope(String),

    // =========================================================================
    // Event Errors
    // =========================================================================
    /// A wire payload could not be parsed.
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// A payload was decoded against a component kind that cannot carry it.
    #[error("Payload mismatch for component kind {kind}: {detail}")]
    PayloadMismatch { kind: String, detail: String },

    /// A component path failed validation.
    #[error("Invalid component path: '{0}'")]
    InvalidComponentPath(String),

    // =========================================================================
    // Watermark Errors
    // =========================================================================
    /// A watermark field was asked to move backwards or past its bound.
    #[error("Watermark regression on {field}: {from} -> {to}")]
    WatermarkRegression {
        field: &'static str,
        from: i64,
        to: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::WatermarkRegression {
            field: "last_uploaded",
            from: 10,
            to: 4,
        };
        assert!(err.to_string().contains("last_uploaded"));
        assert!(err.to_string().contains("10 -> 4"));
    }
}
