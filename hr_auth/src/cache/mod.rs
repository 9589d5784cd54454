//! Shared cache abstraction.
//!
//! Every piece of cross-request mutable state (revocation list, OTP entries,
//! failure counters, rate-limit windows, permission sets) lives behind
//! [`SharedCache`]. Each operation is atomic per key, so callers never need a
//! read-then-write sequence.

pub mod errors;
pub mod memory;
pub mod postgres;

pub use errors::{CacheError, CacheResult};
pub use memory::MemoryCache;
pub use postgres::PgCache;

use async_trait::async_trait;
use std::{fmt::Display, time::Duration};

/// Prefix applied to every key written by this crate
pub const KEY_PREFIX: &str = "hr:";

/// Build a namespaced cache key, e.g. `hr:blacklist:<session id>`
pub fn cache_key(kind: &str, id: impl Display) -> String {
    format!("{KEY_PREFIX}{kind}:{id}")
}

/// Result of one sliding-window check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether the hit was admitted (and recorded)
    pub allowed: bool,
    /// Hits inside the window after this check
    pub count: u32,
    /// Time until the oldest hit in the window leaves it
    pub reset_after: Duration,
}

/// Key/value cache with TTLs and the atomic primitives the auth core needs
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Remove a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Write only if no live entry exists. Returns whether this call wrote it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Increment a counter, creating it at 1 with `ttl` when absent.
    ///
    /// The expiry is set only when the counter is created, so repeated
    /// increments never extend it.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    /// Remaining lifetime of a live entry
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Whether a live entry exists
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Prune hits older than `window`, count the rest and record a new hit
    /// if the count is below `limit`, as one atomic step.
    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> CacheResult<WindowOutcome>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> CacheResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_namespaced() {
        assert_eq!(cache_key("blacklist", "abc"), "hr:blacklist:abc");
        assert_eq!(cache_key("otp:two_factor", "a@b.c"), "hr:otp:two_factor:a@b.c");
    }
}
