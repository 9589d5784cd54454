//! Consecutive-failure lockout per identifier (e-mail or IP).
//!
//! Every attempt reserves a slot in a counter created with a TTL equal to
//! the lockout duration and never extended. Attempts beyond the maximum are
//! refused unevaluated, so a locked identifier stays locked until the
//! counter expires regardless of further attempts.

use crate::{
    auth::AuthResult,
    cache::{SharedCache, cache_key},
    config::SecurityConfig,
};
use std::{sync::Arc, time::Duration};

/// Where an identifier stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Clear,
    Accumulating { failures: u32 },
    Locked { remaining: Duration },
}

/// Whether an attempt may be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Check the credentials. `attempt` counts this one; `last` means a
    /// failure now locks the identifier.
    Admitted { attempt: u32, last: bool },
    Locked { remaining: Duration },
}

#[derive(Clone)]
pub struct LoginAttemptGovernor {
    cache: Arc<dyn SharedCache>,
    max_attempts: u32,
    lockout_duration: Duration,
}

impl LoginAttemptGovernor {
    pub fn new(cache: Arc<dyn SharedCache>, config: &SecurityConfig) -> Self {
        Self {
            cache,
            max_attempts: config.max_login_attempts,
            lockout_duration: config.lockout_duration,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    fn key(identifier: &str) -> String {
        cache_key("login_attempts", identifier.to_lowercase())
    }

    /// Count an attempt before its credentials are checked.
    ///
    /// The counter is incremented first, so concurrent attempts each take a
    /// distinct slot and at most `max_attempts` of them are ever evaluated.
    /// A failed attempt needs no further call. A successful one must call
    /// [`clear`](Self::clear).
    pub async fn reserve_attempt(&self, identifier: &str) -> AuthResult<Admission> {
        let key = Self::key(identifier);
        let attempt = self
            .cache
            .incr_with_expiry(&key, self.lockout_duration)
            .await?;

        if attempt > i64::from(self.max_attempts) {
            let remaining = self
                .cache
                .ttl(&key)
                .await?
                .unwrap_or(self.lockout_duration);
            log::warn!("Refused attempt {attempt} for locked identifier {identifier}");
            return Ok(Admission::Locked { remaining });
        }

        Ok(Admission::Admitted {
            attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
            last: attempt == i64::from(self.max_attempts),
        })
    }

    pub async fn state(&self, identifier: &str) -> AuthResult<AttemptState> {
        let key = Self::key(identifier);
        let Some(value) = self.cache.get(&key).await? else {
            return Ok(AttemptState::Clear);
        };
        let failures: u32 = value.parse().unwrap_or(0);

        if failures >= self.max_attempts {
            let remaining = self.cache.ttl(&key).await?.unwrap_or_default();
            if remaining.is_zero() {
                return Ok(AttemptState::Clear);
            }
            return Ok(AttemptState::Locked { remaining });
        }
        if failures == 0 {
            return Ok(AttemptState::Clear);
        }
        Ok(AttemptState::Accumulating { failures })
    }

    /// Reset after the credentials were accepted
    pub async fn clear(&self, identifier: &str) -> AuthResult<()> {
        self.cache.delete(&Self::key(identifier)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCache, config::AuthConfig};
    use tokio::time::advance;

    fn governor() -> LoginAttemptGovernor {
        let config = AuthConfig::new("a".repeat(32), "b".repeat(32), "p".repeat(16));
        LoginAttemptGovernor::new(Arc::new(MemoryCache::new()), &config.security)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_max_attempts() {
        let governor = governor();
        for expected in 1..=5 {
            assert_eq!(
                governor.reserve_attempt("a@example.com").await.unwrap(),
                Admission::Admitted {
                    attempt: expected,
                    last: expected == 5
                }
            );
        }
        assert_eq!(
            governor.state("a@example.com").await.unwrap(),
            AttemptState::Locked {
                remaining: Duration::from_secs(1800)
            }
        );

        assert_eq!(
            governor.reserve_attempt("a@example.com").await.unwrap(),
            Admission::Locked {
                remaining: Duration::from_secs(1800)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_window_counts_from_first_attempt() {
        let governor = governor();
        governor.reserve_attempt("a@example.com").await.unwrap();
        advance(Duration::from_secs(600)).await;
        for _ in 0..4 {
            governor.reserve_attempt("a@example.com").await.unwrap();
        }

        assert_eq!(
            governor.state("a@example.com").await.unwrap(),
            AttemptState::Locked {
                remaining: Duration::from_secs(1200)
            }
        );

        // Refused attempts do not extend the lock
        assert!(matches!(
            governor.reserve_attempt("a@example.com").await.unwrap(),
            Admission::Locked { .. }
        ));
        advance(Duration::from_secs(1200)).await;
        assert_eq!(
            governor.state("a@example.com").await.unwrap(),
            AttemptState::Clear
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_admit_at_most_max() {
        let governor = governor();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let governor = governor.clone();
            tasks.spawn(async move { governor.reserve_attempt("a@example.com").await.unwrap() });
        }

        let mut admitted = 0;
        while let Some(admission) = tasks.join_next().await {
            if matches!(admission.unwrap(), Admission::Admitted { .. }) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_clear_resets_counter() {
        let governor = governor();
        for _ in 0..4 {
            governor.reserve_attempt("a@example.com").await.unwrap();
        }
        governor.clear("a@example.com").await.unwrap();
        assert_eq!(
            governor.state("a@example.com").await.unwrap(),
            AttemptState::Clear
        );
        assert_eq!(
            governor.reserve_attempt("a@example.com").await.unwrap(),
            Admission::Admitted {
                attempt: 1,
                last: false
            }
        );
    }

    #[tokio::test]
    async fn test_identifiers_are_case_insensitive_and_independent() {
        let governor = governor();
        governor.reserve_attempt("A@Example.com").await.unwrap();
        assert_eq!(
            governor.state("a@example.com").await.unwrap(),
            AttemptState::Accumulating { failures: 1 }
        );
        assert_eq!(
            governor.state("10.0.0.1").await.unwrap(),
            AttemptState::Clear
        );
    }
}
