//! Password policy and hashing.
//!
//! Hashes are Argon2id PHC strings with a server-side pepper appended to the
//! password. Verification reads the cost parameters from the stored hash, so
//! the configured cost can be raised without invalidating existing hashes;
//! [`PasswordManager::needs_rehash`] reports hashes made with older settings.

use crate::{
    auth::{AuthError, AuthResult},
    config::SecurityConfig,
};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on accepted password length, keeps hashing cost bounded
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// A single policy rule a password fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort { min: usize },
    TooLong { max: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

impl fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordViolation::TooShort { min } => {
                write!(f, "must be at least {min} characters")
            }
            PasswordViolation::TooLong { max } => write!(f, "must be at most {max} characters"),
            PasswordViolation::MissingUppercase => f.write_str("must contain an uppercase letter"),
            PasswordViolation::MissingLowercase => f.write_str("must contain a lowercase letter"),
            PasswordViolation::MissingDigit => f.write_str("must contain a digit"),
            PasswordViolation::MissingSymbol => f.write_str("must contain a symbol"),
        }
    }
}

/// Strength rules for new passwords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl PasswordPolicy {
    /// Check every rule and report all that fail
    pub fn validate(&self, password: &str) -> Result<(), Vec<PasswordViolation>> {
        let mut violations = Vec::new();
        let length = password.chars().count();

        if length < self.min_length {
            violations.push(PasswordViolation::TooShort {
                min: self.min_length,
            });
        }
        if length > MAX_PASSWORD_LENGTH {
            violations.push(PasswordViolation::TooLong {
                max: MAX_PASSWORD_LENGTH,
            });
        }
        if !password.chars().any(char::is_uppercase) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        if !password.chars().any(char::is_lowercase) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }
        if !password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            violations.push(PasswordViolation::MissingSymbol);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

/// Validates, hashes and verifies passwords
#[derive(Clone)]
pub struct PasswordManager {
    policy: PasswordPolicy,
    params: Params,
    pepper: String,
}

impl PasswordManager {
    /// Create a password manager from security settings
    ///
    /// # Errors
    ///
    /// Returns `AuthError::HashingFailed` if the Argon2 parameters are out of range
    pub fn new(config: &SecurityConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| {
            log::error!("Invalid Argon2 parameters: {e}");
            AuthError::HashingFailed
        })?;

        Ok(Self {
            policy: PasswordPolicy {
                min_length: config.password_min_length,
            },
            params,
            pepper: config.password_pepper.clone(),
        })
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Validate against the policy, mapping failures to `WeakPassword`
    pub fn validate(&self, password: &str) -> AuthResult<()> {
        self.policy.validate(password).map_err(AuthError::WeakPassword)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn peppered(&self, password: &str) -> String {
        format!("{}{}", password, self.pepper)
    }

    /// Hash password with Argon2id + pepper
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(self
            .argon2()
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    /// Verify password against a stored hash. Malformed hashes never verify.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            log::warn!("Stored password hash is not a valid PHC string");
            return false;
        };

        self.argon2()
            .verify_password(self.peppered(password).as_bytes(), &parsed)
            .is_ok()
    }

    /// Whether a stored hash was produced with different settings than the
    /// current ones
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.m_cost()
                    || stored.t_cost() != self.params.t_cost()
                    || stored.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }

    /// [`PasswordManager::hash`] on the blocking pool
    pub async fn hash_blocking(&self, password: String) -> AuthResult<String> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.hash(&password))
            .await
            .map_err(|_| AuthError::HashingFailed)?
    }

    /// [`PasswordManager::verify`] on the blocking pool
    pub async fn verify_blocking(&self, password: String, hash: String) -> AuthResult<bool> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.verify(&password, &hash))
            .await
            .map_err(|_| AuthError::HashingFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn fast_manager(time_cost: u32) -> PasswordManager {
        let mut config = AuthConfig::new("a".repeat(32), "b".repeat(32), "pepper-pepper-pepper");
        config.security.argon2_time_cost = time_cost;
        config.security.argon2_memory_kib = 1024;
        PasswordManager::new(&config.security).unwrap()
    }

    #[test]
    fn test_policy_reports_every_violation() {
        let policy = PasswordPolicy::default();
        let violations = policy.validate("abc").unwrap_err();
        assert_eq!(
            violations,
            vec![
                PasswordViolation::TooShort { min: 8 },
                PasswordViolation::MissingUppercase,
                PasswordViolation::MissingDigit,
                PasswordViolation::MissingSymbol,
            ]
        );
    }

    #[test]
    fn test_policy_accepts_strong_password() {
        assert!(PasswordPolicy::default().validate("Correct-Horse-9").is_ok());
    }

    #[test]
    fn test_policy_rejects_overlong_password() {
        let long = format!("Aa1!{}", "x".repeat(MAX_PASSWORD_LENGTH));
        let violations = PasswordPolicy::default().validate(&long).unwrap_err();
        assert_eq!(
            violations,
            vec![PasswordViolation::TooLong {
                max: MAX_PASSWORD_LENGTH
            }]
        );
    }

    #[test]
    fn test_hash_and_verify() {
        let manager = fast_manager(1);
        let hash = manager.hash("Correct-Horse-9").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(manager.verify("Correct-Horse-9", &hash));
        assert!(!manager.verify("Correct-Horse-8", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let manager = fast_manager(1);
        let a = manager.hash("Correct-Horse-9").unwrap();
        let b = manager.hash("Correct-Horse-9").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pepper_is_required_to_verify() {
        let manager = fast_manager(1);
        let hash = manager.hash("Correct-Horse-9").unwrap();

        let mut other = AuthConfig::new("a".repeat(32), "b".repeat(32), "another-pepper-value");
        other.security.argon2_time_cost = 1;
        other.security.argon2_memory_kib = 1024;
        let other = PasswordManager::new(&other.security).unwrap();
        assert!(!other.verify("Correct-Horse-9", &hash));
    }

    #[test]
    fn test_cost_change_keeps_old_hashes_valid() {
        let old = fast_manager(1);
        let hash = old.hash("Correct-Horse-9").unwrap();

        let new = fast_manager(2);
        assert!(new.verify("Correct-Horse-9", &hash));
        assert!(new.needs_rehash(&hash));
        assert!(!old.needs_rehash(&hash));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        let manager = fast_manager(1);
        assert!(!manager.verify("anything", "not-a-hash"));
        assert!(manager.needs_rehash("not-a-hash"));
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let manager = fast_manager(1);
        let hash = manager.hash_blocking("Correct-Horse-9".into()).await.unwrap();
        assert!(
            manager
                .verify_blocking("Correct-Horse-9".into(), hash)
                .await
                .unwrap()
        );
    }
}
