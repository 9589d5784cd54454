//! Deadlines for store queries. A stalled database surfaces as
//! [`TimeoutError::Timeout`] rather than a hung request.

use std::time::Duration;
use tokio::time::timeout;

/// Client-side bound on one store query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the multi-statement cache scripts
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a complete auth flow, checked by the service
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type TimeoutResult<T> = Result<T, TimeoutError>;

/// Run a sqlx future, failing with [`TimeoutError::Timeout`] once `limit`
/// elapses.
///
/// ```no_run
/// use hr_auth::db::timeouts::{DEFAULT_QUERY_TIMEOUT, with_timeout};
/// # async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let row = with_timeout(
///     DEFAULT_QUERY_TIMEOUT,
///     sqlx::query("SELECT id FROM identities WHERE email = $1")
///         .bind("employee@example.com")
///         .fetch_optional(pool),
/// )
/// .await?;
/// # let _ = row;
/// # Ok(())
/// # }
/// ```
pub async fn with_timeout<F, T>(limit: Duration, query: F) -> TimeoutResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    timeout(limit, query)
        .await
        .map_err(|_| TimeoutError::Timeout(limit))?
        .map_err(TimeoutError::Database)
}

/// [`with_timeout`] with [`DEFAULT_QUERY_TIMEOUT`]
pub async fn with_default_timeout<F, T>(query: F) -> TimeoutResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, query).await
}
