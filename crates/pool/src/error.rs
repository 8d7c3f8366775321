//! Error types for pool operations
use thiserror::Error;

use crate::entry::EntryId;
use crate::hooks::HookPhase;
use crate::state::LeaseState;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for every pool operation
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// No idle resource became available in time
    #[error("Borrow from pool '{pool}' timed out after {timeout_ms}ms ({waiters} waiting)")]
    BorrowTimeout {
        /// The pool name
        pool: String,
        /// The timeout that elapsed, in milliseconds
        timeout_ms: u64,
        /// Number of borrowers still waiting when the timeout fired
        waiters: usize,
    },

    /// The resource factory failed to produce an instance
    #[error("Creating a resource for pool '{pool}' failed: {reason}")]
    Creation {
        /// The pool name
        pool: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A before-borrow or after-return hook rejected the resource
    #[error("Hook '{hook}' rejected a resource of pool '{pool}' during {phase}: {reason}")]
    HookRejected {
        /// The pool name
        pool: String,
        /// The rejecting hook's name
        hook: String,
        /// The phase the hook ran in
        phase: HookPhase,
        /// The rejection reason
        reason: String,
    },

    /// A lease state compare-and-set found an unexpected state.
    ///
    /// This means the exclusivity guarantee has already been broken
    /// (double return, foreign lease, ...). It is a logic error and is
    /// never retried.
    #[error(
        "Invalid lease transition for entry {entry} of pool '{pool}': expected {expected} -> {to}, found {actual}"
    )]
    InvalidStateTransition {
        /// The pool name
        pool: String,
        /// The entry whose state was wrong
        entry: EntryId,
        /// State the transition required
        expected: LeaseState,
        /// State the transition tried to reach
        to: LeaseState,
        /// State actually observed
        actual: LeaseState,
    },

    /// A lease was handed to a pool that did not issue it
    #[error("Lease for entry {entry} was not issued by pool '{pool}'")]
    ForeignLease {
        /// The pool the lease was handed to
        pool: String,
        /// The lease's entry
        entry: EntryId,
    },

    /// Disposing of a resource failed
    #[error("Cleanup failed for a resource of pool '{pool}': {reason}")]
    Cleanup {
        /// The pool name
        pool: String,
        /// The cleanup failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The pool has been shut down
    #[error("Pool '{pool}' is closed")]
    Closed {
        /// The pool name
        pool: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a creation error without an underlying source
    pub fn creation(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Creation {
            pool: pool.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a creation error wrapping the factory's own error
    pub fn creation_from<E>(pool: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Creation {
            pool: pool.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cleanup error without an underlying source
    pub fn cleanup(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cleanup {
            pool: pool.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BorrowTimeout { .. } | Self::Creation { .. } | Self::HookRejected { .. } => true,
            Self::Configuration { .. }
            | Self::InvalidStateTransition { .. }
            | Self::ForeignLease { .. }
            | Self::Cleanup { .. }
            | Self::Closed { .. } => false,
        }
    }

    /// Whether this error signals a broken internal invariant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition { .. } | Self::ForeignLease { .. }
        )
    }

    /// Get the pool name associated with this error (if any)
    #[must_use]
    pub fn pool(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::BorrowTimeout { pool, .. }
            | Self::Creation { pool, .. }
            | Self::HookRejected { pool, .. }
            | Self::InvalidStateTransition { pool, .. }
            | Self::ForeignLease { pool, .. }
            | Self::Cleanup { pool, .. }
            | Self::Closed { pool } => Some(pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        let err = Error::BorrowTimeout {
            pool: "db".to_string(),
            timeout_ms: 100,
            waiters: 1,
        };
        assert!(err.is_retryable());
        assert_eq!(err.pool(), Some("db"));
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn invariant_violation_is_not_retryable() {
        let err = Error::InvalidStateTransition {
            pool: "db".to_string(),
            entry: EntryId::new(),
            expected: LeaseState::Leased,
            to: LeaseState::Idle,
            actual: LeaseState::Idle,
        };
        assert!(!err.is_retryable());
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn creation_from_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::creation_from("db", io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn configuration_has_no_pool() {
        assert!(Error::configuration("size must be > 0").pool().is_none());
    }
}
