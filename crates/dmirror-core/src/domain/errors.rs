//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation and index status transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid cloud path format or content
    #[error("Invalid cloud path: {0}")]
    InvalidCloudPath(String),

    /// Invalid local path (not absolute, or escapes the sync root)
    #[error("Invalid local path: {0}")]
    InvalidLocalPath(String),

    /// Path is not within the configured sync root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),

    /// Invalid index status transition
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        /// The current status
        from: String,
        /// The attempted target status
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidCloudPath("/bad\tpath".to_string());
        assert_eq!(err.to_string(), "Invalid cloud path: /bad\tpath");

        let err = DomainError::InvalidStatusTransition {
            from: "SYNCED".to_string(),
            to: "DOWNLOADING".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from SYNCED to DOWNLOADING"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::ValidationFailed("x".to_string());
        let err2 = DomainError::ValidationFailed("x".to_string());
        let err3 = DomainError::ValidationFailed("y".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_error_clone() {
        let err = DomainError::PathNotInSyncRoot("/elsewhere".to_string());
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
