//! # Broker Error Types

use thiserror::Error;

use crate::registry::GatewayKind;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker operation errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No registered gateway of the requested kind passes a probe.
    #[error("No available {kind} gateway")]
    NoneAvailable { kind: GatewayKind },

    /// The gateway id is not registered.
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_available_names_the_kind() {
        let err = BrokerError::NoneAvailable {
            kind: GatewayKind::Obj2Srv,
        };
        assert!(err.to_string().contains("obj2srv"));
    }
}
