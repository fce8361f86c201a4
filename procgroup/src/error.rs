//! Error types for group coordination.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`Group`](crate::Group) and [`Process`](crate::Process) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// A bounded wait did not complete before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that was waiting (`wait`, `available`, ...).
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// A process terminated abnormally or could not be spawned.
    #[error("process {process} failed: {reason}")]
    ProcessFailure {
        /// Name of the failing process.
        process: String,
        /// Human readable description of the failure.
        reason: String,
    },
}

impl GroupError {
    pub(crate) const fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    pub(crate) fn failure(process: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessFailure {
            process: process.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a [`GroupError::Timeout`].
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error is a [`GroupError::ProcessFailure`].
    pub const fn is_process_failure(&self) -> bool {
        matches!(self, Self::ProcessFailure { .. })
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, GroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = GroupError::timeout("wait", Duration::from_millis(250));
        assert_eq!(err.to_string(), "wait timed out after 250ms");
        assert!(err.is_timeout());

        let err = GroupError::failure("web", "exited with code 3");
        assert_eq!(err.to_string(), "process web failed: exited with code 3");
        assert!(err.is_process_failure());
    }
}
