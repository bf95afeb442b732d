//! Pool error types.

use thiserror::Error;

/// Error type produced by session factories, adjusters and sessions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The caller's cancellation check fired while it was waiting for capacity
    #[error("cancelled while waiting for a connection")]
    Cancelled,

    /// The pool was torn down before or while the operation ran
    #[error("connection pool has been disposed")]
    Disposed,

    /// The session factory or adjuster failed
    #[error("failed to create session: {0}")]
    CreationFailed(#[source] BoxError),

    /// The requested address has no host to group sessions by
    #[error("address has no host component: {0}")]
    InvalidAddress(String),
}

impl PoolError {
    /// Whether retrying the same operation on the same pool can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Cancelled | PoolError::CreationFailed(_))
    }
}
