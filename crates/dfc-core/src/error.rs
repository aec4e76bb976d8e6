//! Domain-specific error types following panic-free policy.

use crate::{DeviceId, DeviceStatus};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Device not found in registry
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    /// Status transition not allowed by the lifecycle table
    #[error("invalid status transition for {device_id}: {from} -> {to}")]
    InvalidTransition {
        device_id: DeviceId,
        from: DeviceStatus,
        to: DeviceStatus,
    },

    /// Invalid field value
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::DeviceNotFound {
            device_id: DeviceId::new("dev-9"),
        };
        assert_eq!(err.to_string(), "device not found: dev-9");

        let err = DomainError::InvalidTransition {
            device_id: DeviceId::new("dev-9"),
            from: DeviceStatus::Removed,
            to: DeviceStatus::Online,
        };
        assert!(err.to_string().contains("removed -> online"));
    }
}
