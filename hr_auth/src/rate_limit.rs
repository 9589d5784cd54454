//! Sliding-window rate limiting.
//!
//! Three scopes share one primitive:
//! - IP scope: general abuse protection across all routes
//! - identifier scope: e.g. OTP requests per e-mail
//! - endpoint scope: per-route throttling keyed by route and IP
//!
//! The prune-count-add sequence runs atomically inside the cache.

use crate::{
    auth::{AuthError, AuthResult},
    cache::{SharedCache, cache_key},
    config::{RateLimitConfig, RateLimitRule},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

/// Result of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// Turn a rejection into `AuthError::RateLimited`
    pub fn enforce(self) -> AuthResult<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AuthError::RateLimited {
                retry_after: self.retry_after,
            })
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn SharedCache>,
    rules: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn SharedCache>, rules: RateLimitConfig) -> Self {
        Self { cache, rules }
    }

    pub fn rules(&self) -> &RateLimitConfig {
        &self.rules
    }

    /// Record a hit on `key` if fewer than `limit` hits fall inside `window`
    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> AuthResult<RateLimitDecision> {
        let outcome = self.cache.sliding_window(key, limit, window).await?;
        let reset_at = Utc::now()
            + chrono::Duration::from_std(outcome.reset_after).unwrap_or_else(|_| {
                chrono::Duration::seconds(window.as_secs() as i64)
            });

        if !outcome.allowed {
            log::debug!("Rate limit hit for {key}");
        }

        Ok(RateLimitDecision {
            allowed: outcome.allowed,
            limit,
            remaining: limit.saturating_sub(outcome.count),
            reset_at,
            retry_after: outcome.reset_after,
        })
    }

    async fn check_rule(&self, key: &str, rule: RateLimitRule) -> AuthResult<RateLimitDecision> {
        self.check(key, rule.limit, rule.window).await
    }

    /// General per-IP limit
    pub async fn check_ip(&self, ip: &str) -> AuthResult<RateLimitDecision> {
        self.check_rule(&cache_key("rate_limit:ip", ip), self.rules.global_per_ip)
            .await
    }

    /// Limit keyed by a caller-supplied identifier, e.g. an e-mail
    pub async fn check_identifier(
        &self,
        scope: &str,
        identifier: &str,
        rule: RateLimitRule,
    ) -> AuthResult<RateLimitDecision> {
        let key = cache_key("rate_limit:id", format!("{scope}:{}", identifier.to_lowercase()));
        self.check_rule(&key, rule).await
    }

    /// Per-route limit, independent of the per-IP limit
    pub async fn check_endpoint(
        &self,
        endpoint: &str,
        ip: &str,
        rule: RateLimitRule,
    ) -> AuthResult<RateLimitDecision> {
        let key = cache_key("rate_limit:endpoint", format!("{endpoint}:{ip}"));
        self.check_rule(&key, rule).await
    }
}
