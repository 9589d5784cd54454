//! Cache error types.

use crate::db::timeouts::TimeoutError;
use std::time::Duration;
use thiserror::Error;

/// Shared cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing store error
    #[error("Cache backend error: {0}")]
    Backend(#[from] sqlx::Error),

    /// Operation did not finish in time
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// Counter operation on a non-numeric value
    #[error("Value at {0} is not a counter")]
    NotACounter(String),
}

impl From<TimeoutError> for CacheError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => CacheError::Timeout(duration),
            TimeoutError::Database(e) => CacheError::Backend(e),
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
