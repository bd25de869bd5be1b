//! Errors surfaced by the instance store

use thiserror::Error;

use crate::device::DeviceError;

/// Errors that can occur while initializing or feeding an instance store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Program compilation or buffer creation failed; rendering cannot proceed
    #[error("device initialization failed: {0}")]
    DeviceInitialization(#[from] DeviceError),

    /// The batch does not fit in the remaining capacity
    #[error(
        "capacity exceeded: appending {requested} nodes with {available} slots left \
         (limit {limit}) overflows by {overflow}"
    )]
    CapacityExceeded {
        requested: usize,
        available: usize,
        overflow: usize,
        limit: usize,
    },

    /// A record in the batch holds a value that cannot be rendered
    #[error("invalid node at batch index {index}: {field} {reason}")]
    InvalidRecord {
        index: usize,
        field: &'static str,
        reason: String,
    },

    /// Construction parameters are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for instance store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message_reports_overflow() {
        let err = StoreError::CapacityExceeded {
            requested: 8,
            available: 7,
            overflow: 1,
            limit: 10,
        };
        let message = err.to_string();
        assert!(message.contains("overflows by 1"), "{}", message);
        assert!(message.contains("limit 10"), "{}", message);
    }

    #[test]
    fn test_device_error_converts() {
        let err: StoreError = DeviceError::ProgramCompilation("bad".into()).into();
        assert_eq!(
            err.to_string(),
            "device initialization failed: program compilation failed: bad"
        );
    }
}
