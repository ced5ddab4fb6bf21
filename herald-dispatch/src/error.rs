//! Typed error handling for dispatch operations.
//!
//! This module provides structured error types that distinguish between:
//! - Permanent failures (batch rejected outright) - don't retry
//! - Temporary failures (transport hiccups, lost writes) - retry next iteration
//! - System errors - configuration and storage problems
//!
//! Expected control flow (a rate-limited send, a paused queue) is *not*
//! an error here; those travel as outcome values
//! ([`BatchOutcome`](crate::mailer::BatchOutcome),
//! [`ProcessOutcome`](crate::processor::ProcessOutcome)).

use herald_store::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Permanent failure that should not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried on a later iteration.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (storage, configuration, internal).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The transport refused the whole batch outright (policy violation,
    /// malformed content). Retrying the same batch cannot succeed.
    #[error("Batch rejected: {0}")]
    BatchRejected(String),
}

/// Temporary errors that should be retried on the next iteration.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The transport failed mid-send (connection loss, timeout, provider
    /// hiccup). The batch is abandoned and retried wholesale.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A concurrent writer advanced the queue record first.
    #[error("Store conflict: {0}")]
    StoreConflict(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Storage layer failure.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns `true` if this error is temporary and worth retrying.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Categorize storage failures: a lost optimistic write is temporary (the
/// caller re-reads and tries again), everything else is a system problem.
impl From<StoreError> for DispatchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { .. } => {
                Self::Temporary(TemporaryError::StoreConflict(error.to_string()))
            }
            other => Self::System(SystemError::Store(other)),
        }
    }
}

/// Categorize transport failures. A provider rate-limit response is
/// normally intercepted by the dispatcher before it gets here; if it does
/// surface as an error it is temporary by definition.
impl From<TransportError> for DispatchError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::RateLimited { .. } | TransportError::Retryable(_) => {
                Self::Temporary(TemporaryError::Transport(error.to_string()))
            }
            TransportError::Rejected(reason) => {
                Self::Permanent(PermanentError::BatchRejected(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let error = DispatchError::Temporary(TemporaryError::Transport("timeout".to_string()));
        assert!(error.is_temporary());
        assert!(!error.is_permanent());
        assert!(!error.is_system());

        let error = DispatchError::Permanent(PermanentError::BatchRejected("spam".to_string()));
        assert!(error.is_permanent());

        let error = DispatchError::System(SystemError::Configuration("no method".to_string()));
        assert!(error.is_system());
    }

    #[test]
    fn test_store_error_conversion() {
        let conflict = StoreError::Conflict {
            record: "queue x".to_string(),
            expected: 1,
            actual: 2,
        };
        let err: DispatchError = conflict.into();
        assert!(err.is_temporary());

        let internal = StoreError::Internal("oops".to_string());
        let err: DispatchError = internal.into();
        assert!(err.is_system());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: DispatchError = TransportError::Retryable("451 try later".to_string()).into();
        assert!(err.is_temporary());

        let err: DispatchError = TransportError::Rejected("550 refused".to_string()).into();
        assert!(err.is_permanent());

        let err: DispatchError = TransportError::RateLimited { retry_after: None }.into();
        assert!(err.is_temporary());
    }
}
