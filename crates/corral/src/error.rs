//! Error types for pool operations
use thiserror::Error;

/// Boxed error type accepted from factory callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers borrowing from a pool.
///
/// Each failure mode is a distinct variant so integrators can dispatch on
/// kind rather than message text.
#[derive(Error, Debug)]
pub enum Error {
    /// The factory could not manufacture a resource.
    ///
    /// Delivered to the waiter that was next in line for the failed creation
    /// attempt; waiters behind it trigger fresh attempts.
    #[error("pool '{pool}' could not create a resource")]
    Create {
        /// The pool label.
        pool: String,
        /// The factory's failure.
        #[source]
        source: BoxError,
    },

    /// The pool is draining or has drained; no new borrows are accepted.
    #[error("pool '{pool}' is draining; no new borrows are accepted")]
    Drained {
        /// The pool label.
        pool: String,
    },

    /// The pool was forcibly terminated.
    #[error("pool '{pool}' has been shut down")]
    Shutdown {
        /// The pool label.
        pool: String,
    },
}

impl Error {
    pub(crate) fn create(pool: &str, source: BoxError) -> Self {
        Self::Create {
            pool: pool.to_string(),
            source,
        }
    }

    pub(crate) fn drained(pool: &str) -> Self {
        Self::Drained {
            pool: pool.to_string(),
        }
    }

    pub(crate) fn shutdown(pool: &str) -> Self {
        Self::Shutdown {
            pool: pool.to_string(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Creation failures are not fatal to the pool; a later acquire may
    /// succeed. Drain and shutdown are terminal states.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    /// The label of the pool that raised this error.
    #[must_use]
    pub fn pool(&self) -> &str {
        match self {
            Self::Create { pool, .. } | Self::Drained { pool } | Self::Shutdown { pool } => pool,
        }
    }
}
