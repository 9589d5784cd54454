//! PostgreSQL cache backend.
//!
//! Shares state across server instances. Single-key operations are single
//! statements (`INSERT .. ON CONFLICT`); the sliding window runs in a
//! transaction serialized per key with an advisory lock.

#![allow(clippy::needless_raw_string_hashes)]

use super::{CacheError, CacheResult, SharedCache, WindowOutcome};
use crate::db::timeouts::{DEFAULT_QUERY_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT, with_timeout};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// Cache stored in the `cache_entries` and `cache_window_hits` tables
#[derive(Clone)]
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn window_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, sqlx::Error> {
        let window_secs = window.as_secs_f64();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM cache_window_hits WHERE key = $1 AND expires_at <= NOW()")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_window_hits WHERE key = $1")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

        let allowed = count < i64::from(limit);
        if allowed {
            sqlx::query(
                r#"
                INSERT INTO cache_window_hits (key, hit_at, expires_at)
                VALUES ($1, NOW(), NOW() + make_interval(secs => $2))
                "#,
            )
            .bind(key)
            .bind(window_secs)
            .execute(&mut *tx)
            .await?;
        }

        let reset_secs: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT EXTRACT(EPOCH FROM (MIN(expires_at) - NOW()))::float8
            FROM cache_window_hits
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let count = if allowed { count + 1 } else { count };
        Ok(WindowOutcome {
            allowed,
            count: u32::try_from(count).unwrap_or(u32::MAX),
            reset_after: reset_secs
                .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
                .unwrap_or(window),
        })
    }
}

#[async_trait]
impl SharedCache for PgCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = $1 AND expires_at > NOW()")
                .bind(key)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query(
                r#"
                INSERT INTO cache_entries (key, value, expires_at)
                VALUES ($1, $2, NOW() + make_interval(secs => $3))
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let live: Option<bool> = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query_scalar(
                "DELETE FROM cache_entries WHERE key = $1 RETURNING expires_at > NOW()",
            )
            .bind(key)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(live.unwrap_or(false))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let written = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query(
                r#"
                INSERT INTO cache_entries (key, value, expires_at)
                VALUES ($1, $2, NOW() + make_interval(secs => $3))
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                WHERE cache_entries.expires_at <= NOW()
                RETURNING key
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(ttl.as_secs_f64())
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(written.is_some())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let row = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query(
                r#"
                INSERT INTO cache_entries (key, value, expires_at)
                VALUES ($1, '1', NOW() + make_interval(secs => $2))
                ON CONFLICT (key) DO UPDATE
                SET value = CASE
                        WHEN cache_entries.expires_at <= NOW() THEN '1'
                        WHEN cache_entries.value ~ '^-?[0-9]+$'
                            THEN (cache_entries.value::bigint + 1)::text
                        ELSE cache_entries.value
                    END,
                    expires_at = CASE
                        WHEN cache_entries.expires_at <= NOW() THEN EXCLUDED.expires_at
                        ELSE cache_entries.expires_at
                    END
                RETURNING value
                "#,
            )
            .bind(key)
            .bind(ttl.as_secs_f64())
            .fetch_one(&self.pool),
        )
        .await?;

        let value: String = row.get("value");
        value
            .parse()
            .map_err(|_| CacheError::NotACounter(key.to_string()))
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let remaining: Option<f64> = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query_scalar(
                r#"
                SELECT EXTRACT(EPOCH FROM (expires_at - NOW()))::float8
                FROM cache_entries
                WHERE key = $1 AND expires_at > NOW()
                "#,
            )
            .bind(key)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(remaining.map(|secs| Duration::from_secs_f64(secs.max(0.0))))
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> CacheResult<WindowOutcome> {
        let outcome = with_timeout(
            DEFAULT_TRANSACTION_TIMEOUT,
            self.window_check(key, limit, window),
        )
        .await?;
        Ok(outcome)
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        let entries = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query("DELETE FROM cache_entries WHERE expires_at <= NOW()").execute(&self.pool),
        )
        .await?;
        let hits = with_timeout(
            DEFAULT_QUERY_TIMEOUT,
            sqlx::query("DELETE FROM cache_window_hits WHERE expires_at <= NOW()")
                .execute(&self.pool),
        )
        .await?;

        if hits.rows_affected() > 0 {
            log::debug!("Purged {} expired rate-limit hits", hits.rows_affected());
        }
        Ok(entries.rows_affected())
    }
}
