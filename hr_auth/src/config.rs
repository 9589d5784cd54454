//! Security configuration for every auth component.
//!
//! Each component receives the slice of configuration it needs at
//! construction; there is no process-wide "current config".

use std::time::Duration;

/// Complete configuration of the authentication core
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Password, OTP, lockout and cache settings
    pub security: SecurityConfig,
    /// Token signing settings
    pub jwt: JwtConfig,
    /// Rate-limit thresholds per scope
    pub rate_limits: RateLimitConfig,
}

/// Password, OTP and lockout settings
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Server-side pepper mixed into every password before hashing
    pub password_pepper: String,
    /// Argon2 iteration count (the tunable cost factor)
    pub argon2_time_cost: u32,
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,
    /// Argon2 lanes
    pub argon2_parallelism: u32,
    /// Minimum password length in characters
    pub password_min_length: usize,
    /// Number of digits in a one-time code
    pub otp_length: u32,
    /// Lifetime of a one-time code
    pub otp_expiry: Duration,
    /// Wrong submissions tolerated before a code is discarded
    pub otp_max_attempts: u32,
    /// Consecutive failures before an identifier is locked
    pub max_login_attempts: u32,
    /// How long a lock lasts, counted from the first failure
    pub lockout_duration: Duration,
    /// Lifetime of a cached permission set
    pub permission_cache_ttl: Duration,
    /// Lifetime of a password reset token
    pub password_reset_expiry: Duration,
}

/// Token signing settings
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,
    /// HMAC secret for refresh tokens, must differ from `access_secret`
    pub refresh_secret: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// Clock skew tolerated on `exp`/`nbf`
    pub leeway: Duration,
}

/// A single sliding-window threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Requests allowed inside the window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Rate-limit thresholds per scope
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// General abuse protection keyed by client IP
    pub global_per_ip: RateLimitRule,
    /// Login endpoint, keyed by IP + route
    pub login: RateLimitRule,
    /// OTP requests, keyed by the target identifier
    pub otp: RateLimitRule,
    /// Password reset requests, keyed by IP + route
    pub password_reset: RateLimitRule,
    /// Token refresh, keyed by IP + route
    pub refresh: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_ip: RateLimitRule::new(100, Duration::from_secs(60)),
            login: RateLimitRule::new(5, Duration::from_secs(60)),
            otp: RateLimitRule::new(3, Duration::from_secs(300)),
            password_reset: RateLimitRule::new(3, Duration::from_secs(60)),
            refresh: RateLimitRule::new(30, Duration::from_secs(60)),
        }
    }
}

impl AuthConfig {
    /// Build a configuration with default tunables around the given secrets
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        password_pepper: impl Into<String>,
    ) -> Self {
        Self {
            security: SecurityConfig {
                password_pepper: password_pepper.into(),
                argon2_time_cost: 3,
                argon2_memory_kib: 19_456,
                argon2_parallelism: 1,
                password_min_length: 8,
                otp_length: 6,
                otp_expiry: Duration::from_secs(300),
                otp_max_attempts: 5,
                max_login_attempts: 5,
                lockout_duration: Duration::from_secs(1800),
                permission_cache_ttl: Duration::from_secs(900),
                password_reset_expiry: Duration::from_secs(3600),
            },
            jwt: JwtConfig {
                access_secret: access_secret.into(),
                refresh_secret: refresh_secret.into(),
                access_ttl: Duration::from_secs(900),
                refresh_ttl: Duration::from_secs(7 * 24 * 3600),
                issuer: "hr-management-system".to_string(),
                audience: "hr-management-users".to_string(),
                leeway: Duration::from_secs(5),
            },
            rate_limits: RateLimitConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Required:
    /// - `JWT_ACCESS_SECRET`, `JWT_REFRESH_SECRET`: token signing secrets
    /// - `PASSWORD_PEPPER`: password hashing pepper
    ///
    /// Every other option falls back to its default when unset or unparsable.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or the result fails
    /// [`AuthConfig::validate`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_secret = required("JWT_ACCESS_SECRET", "Generate with: openssl rand -hex 32")?;
        let refresh_secret =
            required("JWT_REFRESH_SECRET", "Generate with: openssl rand -hex 32")?;
        let pepper = required("PASSWORD_PEPPER", "Generate with: openssl rand -hex 16")?;

        let mut config = Self::new(access_secret, refresh_secret, pepper);

        let security = &mut config.security;
        security.argon2_time_cost = parse_env_or("ARGON2_TIME_COST", security.argon2_time_cost);
        security.argon2_memory_kib = parse_env_or("ARGON2_MEMORY_KIB", security.argon2_memory_kib);
        security.argon2_parallelism =
            parse_env_or("ARGON2_PARALLELISM", security.argon2_parallelism);
        security.password_min_length =
            parse_env_or("PASSWORD_MIN_LENGTH", security.password_min_length);
        security.otp_length = parse_env_or("OTP_LENGTH", security.otp_length);
        security.otp_expiry = secs_env_or("OTP_EXPIRY_SECS", security.otp_expiry);
        security.otp_max_attempts = parse_env_or("OTP_MAX_ATTEMPTS", security.otp_max_attempts);
        security.max_login_attempts =
            parse_env_or("MAX_LOGIN_ATTEMPTS", security.max_login_attempts);
        security.lockout_duration = secs_env_or("LOCKOUT_DURATION_SECS", security.lockout_duration);
        security.permission_cache_ttl =
            secs_env_or("PERMISSION_CACHE_TTL_SECS", security.permission_cache_ttl);
        security.password_reset_expiry =
            secs_env_or("PASSWORD_RESET_EXPIRY_SECS", security.password_reset_expiry);

        let jwt = &mut config.jwt;
        jwt.access_ttl = secs_env_or("JWT_ACCESS_EXPIRY_SECS", jwt.access_ttl);
        jwt.refresh_ttl = secs_env_or("JWT_REFRESH_EXPIRY_SECS", jwt.refresh_ttl);
        jwt.leeway = secs_env_or("JWT_LEEWAY_SECS", jwt.leeway);
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            jwt.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("JWT_AUDIENCE") {
            jwt.audience = audience;
        }

        let limits = &mut config.rate_limits;
        limits.global_per_ip.limit = parse_env_or("RATE_LIMIT_PER_MINUTE", limits.global_per_ip.limit);
        limits.login = rule_env_or("RATE_LIMIT_LOGIN", limits.login);
        limits.otp = rule_env_or("RATE_LIMIT_OTP", limits.otp);
        limits.password_reset = rule_env_or("RATE_LIMIT_RESET", limits.password_reset);
        limits.refresh = rule_env_or("RATE_LIMIT_REFRESH", limits.refresh);

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;
        let security = &self.security;

        if jwt.access_secret.len() < 32 {
            return Err(invalid("JWT_ACCESS_SECRET", "Must be at least 32 characters"));
        }
        if jwt.refresh_secret.len() < 32 {
            return Err(invalid("JWT_REFRESH_SECRET", "Must be at least 32 characters"));
        }
        if jwt.access_secret == jwt.refresh_secret {
            return Err(invalid(
                "JWT_REFRESH_SECRET",
                "Must differ from JWT_ACCESS_SECRET",
            ));
        }
        if jwt.access_ttl.is_zero() || jwt.access_ttl >= jwt.refresh_ttl {
            return Err(invalid(
                "JWT_ACCESS_EXPIRY_SECS",
                "Must be non-zero and shorter than the refresh lifetime",
            ));
        }
        if security.password_pepper.len() < 16 {
            return Err(invalid("PASSWORD_PEPPER", "Must be at least 16 characters"));
        }
        if security.argon2_time_cost == 0 {
            return Err(invalid("ARGON2_TIME_COST", "Must be greater than 0"));
        }
        if !(4..=10).contains(&security.otp_length) {
            return Err(invalid("OTP_LENGTH", "Must be between 4 and 10 digits"));
        }
        if security.otp_expiry.is_zero() || security.otp_expiry > Duration::from_secs(3600) {
            return Err(invalid("OTP_EXPIRY_SECS", "Must be between 1 second and 1 hour"));
        }
        if security.otp_max_attempts == 0 {
            return Err(invalid("OTP_MAX_ATTEMPTS", "Must be greater than 0"));
        }
        if security.max_login_attempts == 0 {
            return Err(invalid("MAX_LOGIN_ATTEMPTS", "Must be greater than 0"));
        }
        if security.lockout_duration.is_zero() {
            return Err(invalid("LOCKOUT_DURATION_SECS", "Must be greater than 0"));
        }
        if security.permission_cache_ttl.is_zero()
            || security.permission_cache_ttl >= jwt.refresh_ttl
        {
            return Err(invalid(
                "PERMISSION_CACHE_TTL_SECS",
                "Must be non-zero and shorter than the refresh lifetime",
            ));
        }

        for (var, rule) in [
            ("RATE_LIMIT_PER_MINUTE", self.rate_limits.global_per_ip),
            ("RATE_LIMIT_LOGIN", self.rate_limits.login),
            ("RATE_LIMIT_OTP", self.rate_limits.otp),
            ("RATE_LIMIT_RESET", self.rate_limits.password_reset),
            ("RATE_LIMIT_REFRESH", self.rate_limits.refresh),
        ] {
            if rule.limit == 0 || rule.window.is_zero() {
                return Err(invalid(var, "Limit and window must be greater than 0"));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn required(var: &str, hint: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingRequired {
        var: var.to_string(),
        hint: hint.to_string(),
    })
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

/// Helper to parse environment variable with default fallback
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Same as [`parse_env_or`] for a duration expressed in whole seconds
pub fn secs_env_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn rule_env_or(prefix: &str, default: RateLimitRule) -> RateLimitRule {
    RateLimitRule {
        limit: parse_env_or(&format!("{prefix}_ATTEMPTS"), default.limit),
        window: secs_env_or(&format!("{prefix}_WINDOW_SECS"), default.window),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuthConfig {
        AuthConfig::new("a".repeat(32), "b".repeat(32), "p".repeat(16))
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let config = AuthConfig::new("a".repeat(32), "a".repeat(32), "p".repeat(16));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_REFRESH_SECRET"));
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = AuthConfig::new("short", "b".repeat(32), "p".repeat(16));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_otp_length_bounds() {
        let mut config = valid_config();
        config.security.otp_length = 3;
        assert!(config.validate().is_err());

        config.security.otp_length = 10;
        assert!(config.validate().is_ok());

        config.security.otp_length = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_permission_cache_must_be_shorter_than_refresh() {
        let mut config = valid_config();
        config.security.permission_cache_ttl = config.jwt.refresh_ttl;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = valid_config();
        config.rate_limits.otp.limit = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_OTP"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_ACCESS_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_ACCESS_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_secs_env_or_falls_back() {
        let value = secs_env_or("HR_AUTH_TEST_UNSET_DURATION", Duration::from_secs(42));
        assert_eq!(value, Duration::from_secs(42));
    }
}
