//! Access/refresh token issuance and validation.
//!
//! Both tokens are HS256 JWTs carrying the same identity and authorization
//! claims. They are signed with distinct secrets and tagged with
//! `token_type`, and validation checks both, so neither kind can stand in for
//! the other. A fresh session id links the two tokens of a pair.

use crate::{
    auth::{AuthError, AuthResult, IdentityId},
    config::JwtConfig,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

/// Which half of a pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// Signed token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: IdentityId,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub sid: Uuid,
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    /// Time left before `exp`, zero when already past
    pub fn remaining_lifetime(&self) -> Duration {
        let remaining = self.exp - Utc::now().timestamp();
        Duration::from_secs(u64::try_from(remaining).unwrap_or(0))
    }
}

/// An issued access/refresh pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Who a pair is issued to
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject<'a> {
    pub id: IdentityId,
    pub email: &'a str,
    pub roles: &'a [String],
    pub permissions: &'a [String],
}

/// Signs and validates token pairs
#[derive(Clone)]
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
    audience: String,
    leeway: Duration,
}

impl TokenIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway: config.leeway,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint a pair under a new session id
    pub fn issue_pair(&self, subject: TokenSubject<'_>) -> AuthResult<TokenPair> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let access = self.claims_for(&subject, session_id, TokenType::Access, now);
        let refresh = self.claims_for(&subject, session_id, TokenType::Refresh, now);

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
            expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
            session_id,
        })
    }

    fn claims_for(
        &self,
        subject: &TokenSubject<'_>,
        session_id: Uuid,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Claims {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let iat = now.timestamp();

        Claims {
            sub: subject.id,
            email: subject.email.to_string(),
            roles: subject.roles.to_vec(),
            permissions: subject.permissions.to_vec(),
            sid: session_id,
            token_type,
            iat,
            nbf: iat,
            exp: iat + ttl.as_secs() as i64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        }
    }

    /// Sign claims with the key matching their `token_type`
    pub fn sign(&self, claims: &Claims) -> AuthResult<String> {
        let key = match claims.token_type {
            TokenType::Access => &self.access_encoding,
            TokenType::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::HS256), claims, key).map_err(|e| {
            log::error!("Failed to sign {} token: {e}", claims.token_type);
            AuthError::TokenSigning
        })
    }

    /// Verify signature, issuer, audience, `exp`/`nbf` and token type
    pub fn validate(&self, token: &str, expected: TokenType) -> AuthResult<Claims> {
        let key = match expected {
            TokenType::Access => &self.access_decoding,
            TokenType::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        let claims = decode::<Claims>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })?
            .claims;

        if claims.token_type != expected {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }
}
