//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use hr_auth::{
    config::{AuthConfig, parse_env_or},
    db::DatabaseConfig,
};
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

/// Where the shared cache lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Tables in the main database, shared by every server process
    Postgres,
    /// Process-local maps, for single-instance deployments and development
    Memory,
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(CacheBackend::Postgres),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(ConfigError::Invalid {
                var: "CACHE_BACKEND".to_string(),
                reason: format!("Unknown backend '{other}', expected 'postgres' or 'memory'"),
            }),
        }
    }
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Authentication core configuration
    pub auth: AuthConfig,
    /// Shared cache backend
    pub cache_backend: CacheBackend,
    /// Upper bound on handling one request
    pub request_timeout: Duration,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`
    pub trusted_proxies: Vec<IpAddr>,
    /// Outbound mail webhook, codes are only logged as undeliverable without it
    pub mail_webhook_url: Option<String>,
    /// Prometheus exporter address
    pub metrics_bind: Option<SocketAddr>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `cache_override` - Optional cache backend override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        cache_override: Option<CacheBackend>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => match std::env::var("SERVER_BIND") {
                Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    var: "SERVER_BIND".to_string(),
                    reason: format!("'{value}' is not an IP:PORT address"),
                })?,
                Err(_) => SocketAddr::from(([127, 0, 0, 1], 8080)),
            },
        };

        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.url = url;
        }

        let auth = AuthConfig::from_env()?;

        let cache_backend = match cache_override {
            Some(backend) => backend,
            None => std::env::var("CACHE_BACKEND")
                .ok()
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(CacheBackend::Postgres),
        };

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(value) => parse_proxy_list(&value)?,
            Err(_) => Vec::new(),
        };

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("'{value}' is not an IP:PORT address"),
            })?),
            Err(_) => None,
        };

        Ok(ServerConfig {
            bind,
            database,
            auth,
            cache_backend,
            request_timeout: Duration::from_secs(parse_env_or("REQUEST_TIMEOUT_SECS", 30)),
            trusted_proxies,
            mail_webhook_url: std::env::var("MAIL_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            metrics_bind,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;
        self.database.validate()?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if let Some(url) = &self.mail_webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    var: "MAIL_WEBHOOK_URL".to_string(),
                    reason: "Must be an http(s) URL".to_string(),
                });
            }
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: "Must differ from SERVER_BIND".to_string(),
            });
        }

        Ok(())
    }
}

/// Parse a comma-separated list of proxy IPs
fn parse_proxy_list(value: &str) -> Result<Vec<IpAddr>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::Invalid {
                var: "TRUSTED_PROXIES".to_string(),
                reason: format!("'{s}' is not an IP address"),
            })
        })
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error(transparent)]
    Auth(#[from] hr_auth::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            database: DatabaseConfig::new("postgres://postgres@localhost/hr_db"),
            auth: AuthConfig::new("a".repeat(32), "b".repeat(32), "p".repeat(16)),
            cache_backend: CacheBackend::Memory,
            request_timeout: Duration::from_secs(30),
            trusted_proxies: Vec::new(),
            mail_webhook_url: None,
            metrics_bind: None,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            var: "SERVER_BIND".to_string(),
            reason: "not an address".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SERVER_BIND"));
        assert!(msg.contains("not an address"));
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = config();
        config.request_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn test_config_validation_bad_webhook() {
        let mut config = config();
        config.mail_webhook_url = Some("ftp://mail".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_propagates_auth_errors() {
        let mut config = config();
        config.auth.jwt.refresh_secret = config.auth.jwt.access_secret.clone();
        assert!(matches!(config.validate().unwrap_err(), ConfigError::Auth(_)));
    }

    #[test]
    fn test_cache_backend_parse() {
        assert_eq!("memory".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert_eq!("Postgres".parse::<CacheBackend>().unwrap(), CacheBackend::Postgres);
        assert!("redis".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_parse_proxy_list() {
        let proxies = parse_proxy_list("10.0.0.1, ::1,").unwrap();
        assert_eq!(proxies.len(), 2);
        assert!(parse_proxy_list("not-an-ip").is_err());
    }
}
