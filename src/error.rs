//! Error types for the storage gateway
//!
//! Provides the structured error taxonomy shared by the context, registry,
//! task engine, device waiter, and executor CLI.

use crate::context::ContextKey;
use crate::registry::DriverKind;
use std::time::Duration;
use thiserror::Error;

/// Process exit code for an operation the driver does not implement
pub const EXIT_CODE_NOT_IMPLEMENTED: i32 = 2;

/// Process exit code for a device wait that reached its deadline
pub const EXIT_CODE_TIMED_OUT: i32 = 255;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Context Errors
    // =========================================================================
    #[error("Context key not found: {key}")]
    ContextKeyNotFound { key: ContextKey },

    #[error("Context value for {key} has wrong type: expected {expected}, found {actual}")]
    ContextTypeMismatch {
        key: ContextKey,
        expected: &'static str,
        actual: &'static str,
    },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Driver not found: {kind}/{name}")]
    DriverNotFound { kind: DriverKind, name: String },

    #[error("Service not found: {name}")]
    ServiceNotFound { name: String },

    #[error("Volume not found: {id}")]
    VolumeNotFound { id: String },

    #[error("Operation not implemented on this driver: {op}")]
    NotImplemented { op: &'static str },

    // =========================================================================
    // Device Wait Errors
    // =========================================================================
    #[error("Device wait timed out after {timeout:?} for token {token}")]
    DeviceWaitTimeout { token: String, timeout: Duration },

    // =========================================================================
    // Batch Errors
    // =========================================================================
    #[error("Batch operation failed on service {service}: {cause}")]
    Batch {
        service: String,
        #[source]
        cause: Box<Error>,
    },

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Precondition violated: {0}")]
    Precondition(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Invalid device scan type: {0}")]
    InvalidScanType(String),

    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Internal / IO Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error means the driver lacks the requested capability
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented { .. })
    }

    /// Check if this error is a device-wait deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::DeviceWaitTimeout { .. })
    }

    /// Check if this error represents an absent context key or registry name
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ContextKeyNotFound { .. }
                | Error::DriverNotFound { .. }
                | Error::ServiceNotFound { .. }
                | Error::VolumeNotFound { .. }
        )
    }

    /// Stable process exit code for this error.
    ///
    /// Remote callers key off these, so the mapping must not change:
    /// 2 for an unimplemented operation, 255 for a device-wait timeout,
    /// 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotImplemented { .. } => EXIT_CODE_NOT_IMPLEMENTED,
            Error::DeviceWaitTimeout { .. } => EXIT_CODE_TIMED_OUT,
            _ => 1,
        }
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = Error::NotImplemented { op: "mount" };
        assert_eq!(err.exit_code(), EXIT_CODE_NOT_IMPLEMENTED);
        assert!(err.is_not_implemented());

        let err = Error::DeviceWaitTimeout {
            token: "xvdf".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.exit_code(), EXIT_CODE_TIMED_OUT);
        assert!(err.is_timeout());

        let err = Error::Configuration("bad".into());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_not_found_predicate() {
        let err = Error::DriverNotFound {
            kind: DriverKind::Storage,
            name: "ebs".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_timeout());

        let err = Error::ContextKeyNotFound {
            key: ContextKey::TransactionId,
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn test_batch_error_carries_cause() {
        let err = Error::Batch {
            service: "ebs-east".into(),
            cause: Box::new(Error::NotImplemented { op: "volumeCreate" }),
        };
        let msg = err.to_string();
        assert!(msg.contains("ebs-east"));
        assert!(msg.contains("volumeCreate"));
    }
}
