//! Connection pool settings for the identity and session stores.

use std::time::Duration;

use crate::config::{ConfigError, parse_env_or, secs_env_or};

/// Name the pool reports to PostgreSQL, visible in `pg_stat_activity`
pub const APPLICATION_NAME: &str = "hr_auth";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a request may wait for a free connection
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Server-side cap applied to every statement on a pooled connection
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    /// Pool sized for a single auth server instance.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            statement_timeout: Duration::from_secs(5),
        }
    }

    /// Small pool for integration tests.
    pub fn for_tests(url: impl Into<String>) -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            ..Self::new(url)
        }
    }

    /// Read `DATABASE_URL` and the `DB_*` pool overrides.
    ///
    /// Without `DATABASE_URL` the local development database is used.
    pub fn from_env() -> Self {
        let defaults = Self::new(
            std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres@localhost/hr_db".to_string()),
        );
        Self {
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: secs_env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
            idle_timeout: secs_env_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            max_lifetime: secs_env_or("DB_MAX_LIFETIME_SECS", defaults.max_lifetime),
            statement_timeout: secs_env_or(
                "DB_STATEMENT_TIMEOUT_SECS",
                defaults.statement_timeout,
            ),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_MAX_CONNECTIONS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!("Must not exceed DB_MAX_CONNECTIONS ({})", self.max_connections),
            });
        }
        if self.statement_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "DB_STATEMENT_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
