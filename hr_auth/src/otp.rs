//! One-time code engine.
//!
//! Codes are drawn from the thread-local CSPRNG, stored only as SHA-256
//! digests under a key scoped by purpose and e-mail, and consumed on the
//! first successful verification. A sibling counter bounds wrong guesses.

use crate::{
    auth::{AuthError, AuthResult},
    cache::{SharedCache, cache_key},
    config::SecurityConfig,
};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a code is allowed to prove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    TwoFactor,
    EmailVerification,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::TwoFactor => "two_factor",
            OtpPurpose::EmailVerification => "email_verification",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }

    /// Whether callers may request and check codes of this purpose directly.
    /// Two-factor codes are only issued after a password check.
    pub fn is_self_service(&self) -> bool {
        !matches!(self, OtpPurpose::TwoFactor)
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpPurpose {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "two_factor" => Ok(OtpPurpose::TwoFactor),
            "email_verification" => Ok(OtpPurpose::EmailVerification),
            "password_reset" => Ok(OtpPurpose::PasswordReset),
            other => Err(AuthError::Validation(format!("Unknown OTP purpose: {other}"))),
        }
    }
}

/// Outcome of a verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerification {
    Verified,
    /// No live code for this e-mail and purpose
    Expired,
    /// Wrong code, or the attempt budget is exhausted
    Invalid,
}

impl OtpVerification {
    /// Map non-success outcomes onto the error taxonomy
    pub fn into_result(self) -> AuthResult<()> {
        match self {
            OtpVerification::Verified => Ok(()),
            OtpVerification::Expired => Err(AuthError::OtpExpired),
            OtpVerification::Invalid => Err(AuthError::OtpInvalid),
        }
    }
}

/// Outbound delivery failure
#[derive(Debug, thiserror::Error)]
#[error("Delivery failed: {0}")]
pub struct DispatchError(pub String);

/// Delivers codes and reset links to the identity's inbox
#[async_trait]
pub trait OtpDispatcher: Send + Sync {
    /// Send a one-time code
    async fn dispatch_code(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code: &str,
        expires_in: Duration,
    ) -> Result<(), DispatchError>;

    /// Send a password reset token
    async fn dispatch_reset(
        &self,
        email: &str,
        token: &str,
        expires_in: Duration,
    ) -> Result<(), DispatchError>;
}

/// Dispatcher that drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl OtpDispatcher for NoopDispatcher {
    async fn dispatch_code(
        &self,
        email: &str,
        purpose: OtpPurpose,
        _code: &str,
        _expires_in: Duration,
    ) -> Result<(), DispatchError> {
        log::debug!("Dropping {purpose} code for {email}");
        Ok(())
    }

    async fn dispatch_reset(
        &self,
        email: &str,
        _token: &str,
        _expires_in: Duration,
    ) -> Result<(), DispatchError> {
        log::debug!("Dropping password reset message for {email}");
        Ok(())
    }
}

/// A message captured by [`RecordingDispatcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchedMessage {
    Code {
        email: String,
        purpose: OtpPurpose,
        code: String,
    },
    Reset {
        email: String,
        token: String,
    },
}

/// Dispatcher that keeps every message in memory, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<DispatchedMessage>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<DispatchedMessage> {
        self.sent.lock().await.clone()
    }

    /// Most recent code sent to `email` for `purpose`
    pub async fn last_code(&self, email: &str, purpose: OtpPurpose) -> Option<String> {
        self.sent.lock().await.iter().rev().find_map(|m| match m {
            DispatchedMessage::Code {
                email: to,
                purpose: p,
                code,
            } if to == email && *p == purpose => Some(code.clone()),
            _ => None,
        })
    }

    /// Most recent reset token sent to `email`
    pub async fn last_reset_token(&self, email: &str) -> Option<String> {
        self.sent.lock().await.iter().rev().find_map(|m| match m {
            DispatchedMessage::Reset { email: to, token } if to == email => Some(token.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl OtpDispatcher for RecordingDispatcher {
    async fn dispatch_code(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code: &str,
        _expires_in: Duration,
    ) -> Result<(), DispatchError> {
        self.sent.lock().await.push(DispatchedMessage::Code {
            email: email.to_string(),
            purpose,
            code: code.to_string(),
        });
        Ok(())
    }

    async fn dispatch_reset(
        &self,
        email: &str,
        token: &str,
        _expires_in: Duration,
    ) -> Result<(), DispatchError> {
        self.sent.lock().await.push(DispatchedMessage::Reset {
            email: email.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }
}

/// Generate a zero-padded numeric code of `length` digits
pub fn generate_code(length: u32) -> String {
    let upper = 10u64.pow(length);
    let value = rand::rng().random_range(0..upper);
    format!("{:0width$}", value, width = length as usize)
}

/// Hex SHA-256 of a code
pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn code_key(email: &str, purpose: OtpPurpose) -> String {
    cache_key("otp", format!("{purpose}:{email}"))
}

fn attempts_key(email: &str, purpose: OtpPurpose) -> String {
    cache_key("otp_attempts", format!("{purpose}:{email}"))
}

fn challenge_key(email: &str) -> String {
    cache_key("login_challenge", email)
}

/// Issues and verifies one-time codes
#[derive(Clone)]
pub struct OtpEngine {
    cache: Arc<dyn SharedCache>,
    dispatcher: Arc<dyn OtpDispatcher>,
    length: u32,
    expiry: Duration,
    max_attempts: u32,
}

impl OtpEngine {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        dispatcher: Arc<dyn OtpDispatcher>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            length: config.otp_length,
            expiry: config.otp_expiry,
            max_attempts: config.otp_max_attempts,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn dispatcher(&self) -> &Arc<dyn OtpDispatcher> {
        &self.dispatcher
    }

    /// Store a fresh code for `(email, purpose)` and send it.
    ///
    /// Replaces any live code for the same key and resets its attempt budget.
    pub async fn issue(&self, email: &str, purpose: OtpPurpose) -> AuthResult<()> {
        let code = generate_code(self.length);

        self.cache
            .set(&code_key(email, purpose), &hash_code(&code), self.expiry)
            .await?;
        self.cache.delete(&attempts_key(email, purpose)).await?;

        self.dispatcher
            .dispatch_code(email, purpose, &code, self.expiry)
            .await
            .map_err(|e| AuthError::Delivery(e.to_string()))?;

        log::info!("Issued {purpose} code for {email}");
        Ok(())
    }

    /// Open the second login step for an identity whose password was just
    /// accepted, then send its two-factor code.
    ///
    /// The challenge lives as long as the code.
    pub async fn begin_login_challenge(&self, email: &str, identity_id: Uuid) -> AuthResult<()> {
        self.cache
            .set(&challenge_key(email), &identity_id.to_string(), self.expiry)
            .await?;
        self.issue(email, OtpPurpose::TwoFactor).await
    }

    /// Identity whose password step opened a challenge for `email`
    pub async fn pending_login(&self, email: &str) -> AuthResult<Option<Uuid>> {
        let Some(value) = self.cache.get(&challenge_key(email)).await? else {
            return Ok(None);
        };
        match value.parse() {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                log::warn!("Discarding unreadable login challenge for {email}: {e}");
                self.cache.delete(&challenge_key(email)).await?;
                Ok(None)
            }
        }
    }

    pub async fn end_login_challenge(&self, email: &str) -> AuthResult<()> {
        self.cache.delete(&challenge_key(email)).await?;
        Ok(())
    }

    /// Check a submitted code. A correct code is consumed.
    pub async fn verify(
        &self,
        email: &str,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> AuthResult<OtpVerification> {
        let key = code_key(email, purpose);
        let Some(stored) = self.cache.get(&key).await? else {
            return Ok(OtpVerification::Expired);
        };

        let submitted_hash = hash_code(submitted.trim());
        let matches: bool = submitted_hash.as_bytes().ct_eq(stored.as_bytes()).into();

        if matches {
            // A concurrent verify may have consumed it first
            if !self.cache.delete(&key).await? {
                return Ok(OtpVerification::Expired);
            }
            self.cache.delete(&attempts_key(email, purpose)).await?;
            return Ok(OtpVerification::Verified);
        }

        let attempts_key = attempts_key(email, purpose);
        let attempts = self
            .cache
            .incr_with_expiry(&attempts_key, self.expiry)
            .await?;
        if attempts >= i64::from(self.max_attempts) {
            log::warn!("Discarding {purpose} code for {email} after {attempts} wrong attempts");
            self.cache.delete(&key).await?;
            self.cache.delete(&attempts_key).await?;
        }

        Ok(OtpVerification::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCache, config::AuthConfig};

    fn engine() -> (OtpEngine, RecordingDispatcher) {
        let config = AuthConfig::new("a".repeat(32), "b".repeat(32), "p".repeat(16));
        let dispatcher = RecordingDispatcher::new();
        let engine = OtpEngine::new(
            Arc::new(MemoryCache::new()),
            Arc::new(dispatcher.clone()),
            &config.security,
        );
        (engine, dispatcher)
    }

    #[test]
    fn test_generate_code_is_fixed_width_numeric() {
        for length in [4, 6, 10] {
            for _ in 0..50 {
                let code = generate_code(length);
                assert_eq!(code.len(), length as usize);
                assert!(code.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }

    #[test]
    fn test_hash_code_is_sha256_hex() {
        assert_eq!(
            hash_code("123456"),
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
        );
    }

    #[test]
    fn test_purpose_parsing() {
        assert_eq!("two_factor".parse::<OtpPurpose>().unwrap(), OtpPurpose::TwoFactor);
        assert!(matches!(
            "login".parse::<OtpPurpose>(),
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (engine, dispatcher) = engine();
        engine.issue("a@example.com", OtpPurpose::TwoFactor).await.unwrap();
        let code = dispatcher
            .last_code("a@example.com", OtpPurpose::TwoFactor)
            .await
            .unwrap();

        let first = engine
            .verify("a@example.com", OtpPurpose::TwoFactor, &code)
            .await
            .unwrap();
        assert_eq!(first, OtpVerification::Verified);

        let second = engine
            .verify("a@example.com", OtpPurpose::TwoFactor, &code)
            .await
            .unwrap();
        assert_eq!(second, OtpVerification::Expired);
    }

    #[tokio::test]
    async fn test_codes_are_scoped_by_purpose() {
        let (engine, dispatcher) = engine();
        engine
            .issue("a@example.com", OtpPurpose::EmailVerification)
            .await
            .unwrap();
        let code = dispatcher
            .last_code("a@example.com", OtpPurpose::EmailVerification)
            .await
            .unwrap();

        let outcome = engine
            .verify("a@example.com", OtpPurpose::TwoFactor, &code)
            .await
            .unwrap();
        assert_eq!(outcome, OtpVerification::Expired);
    }

    #[tokio::test]
    async fn test_reissue_replaces_previous_code() {
        let (engine, dispatcher) = engine();
        let email = "a@example.com";

        engine.issue(email, OtpPurpose::TwoFactor).await.unwrap();
        let first = dispatcher.last_code(email, OtpPurpose::TwoFactor).await.unwrap();

        // Retry until the second code differs so the assertion is meaningful
        let mut second = first.clone();
        while second == first {
            engine.issue(email, OtpPurpose::TwoFactor).await.unwrap();
            second = dispatcher.last_code(email, OtpPurpose::TwoFactor).await.unwrap();
        }

        assert_eq!(
            engine.verify(email, OtpPurpose::TwoFactor, &first).await.unwrap(),
            OtpVerification::Invalid
        );
        assert_eq!(
            engine.verify(email, OtpPurpose::TwoFactor, &second).await.unwrap(),
            OtpVerification::Verified
        );
    }

    #[tokio::test]
    async fn test_attempt_budget_discards_code() {
        let (engine, dispatcher) = engine();
        let email = "a@example.com";
        engine.issue(email, OtpPurpose::TwoFactor).await.unwrap();
        let code = dispatcher.last_code(email, OtpPurpose::TwoFactor).await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..5 {
            assert_eq!(
                engine.verify(email, OtpPurpose::TwoFactor, wrong).await.unwrap(),
                OtpVerification::Invalid
            );
        }

        assert_eq!(
            engine.verify(email, OtpPurpose::TwoFactor, &code).await.unwrap(),
            OtpVerification::Expired
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires() {
        let (engine, dispatcher) = engine();
        let email = "a@example.com";
        engine.issue(email, OtpPurpose::PasswordReset).await.unwrap();
        let code = dispatcher
            .last_code(email, OtpPurpose::PasswordReset)
            .await
            .unwrap();

        tokio::time::advance(engine.expiry()).await;
        assert_eq!(
            engine
                .verify(email, OtpPurpose::PasswordReset, &code)
                .await
                .unwrap(),
            OtpVerification::Expired
        );
    }

    #[test]
    fn test_two_factor_is_not_self_service() {
        assert!(!OtpPurpose::TwoFactor.is_self_service());
        assert!(OtpPurpose::EmailVerification.is_self_service());
        assert!(OtpPurpose::PasswordReset.is_self_service());
    }

    #[tokio::test]
    async fn test_login_challenge_binds_identity() {
        let (engine, dispatcher) = engine();
        let id = Uuid::new_v4();
        assert_eq!(engine.pending_login("a@example.com").await.unwrap(), None);

        engine.begin_login_challenge("a@example.com", id).await.unwrap();
        assert_eq!(engine.pending_login("a@example.com").await.unwrap(), Some(id));
        assert!(
            dispatcher
                .last_code("a@example.com", OtpPurpose::TwoFactor)
                .await
                .is_some()
        );

        engine.end_login_challenge("a@example.com").await.unwrap();
        assert_eq!(engine.pending_login("a@example.com").await.unwrap(), None);
    }

    #[test]
    fn test_into_result_maps_taxonomy() {
        assert!(OtpVerification::Verified.into_result().is_ok());
        assert!(matches!(
            OtpVerification::Expired.into_result(),
            Err(AuthError::OtpExpired)
        ));
        assert!(matches!(
            OtpVerification::Invalid.into_result(),
            Err(AuthError::OtpInvalid)
        ));
    }
}
