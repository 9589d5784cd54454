//! Authentication data models.

use crate::{otp::OtpPurpose, tokens::TokenPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Identity ID type
pub type IdentityId = Uuid;

/// Account status. Only `Active` identities may receive tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IdentityStatus::Active),
            "inactive" => Ok(IdentityStatus::Inactive),
            "suspended" => Ok(IdentityStatus::Suspended),
            "pending" => Ok(IdentityStatus::Pending),
            other => Err(format!("unknown identity status: {other}")),
        }
    }
}

/// Credential-bearing identity row
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub status: IdentityStatus,
    pub two_factor_enabled: bool,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

/// Durable audit record of an issued session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub identity_id: IdentityId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Caller network details attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }

    /// Hex SHA-256 of `user_agent|ip`
    pub fn fingerprint(&self) -> String {
        let material = format!(
            "{}|{}",
            self.user_agent.as_deref().unwrap_or_default(),
            self.ip.as_deref().unwrap_or_default()
        );
        hex::encode(Sha256::digest(material.as_bytes()))
    }
}

/// The authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentIdentity {
    pub id: IdentityId,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub session_id: Uuid,
}

impl CurrentIdentity {
    pub fn has_permission(&self, required: &str) -> bool {
        crate::permissions::has_any(&self.permissions, &[required])
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Second login step for two-factor identities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorRequest {
    pub email: String,
    pub code: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Password change for an authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Password reset request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Password reset confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

/// Request for a one-time code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
    pub purpose: OtpPurpose,
}

/// Submission of a one-time code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub purpose: OtpPurpose,
    pub code: String,
}

/// Tokens plus the identity they were issued to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub identity: CurrentIdentity,
    pub tokens: TokenPair,
}

/// Result of the first login step
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Credentials accepted, session issued
    Authenticated(AuthenticatedSession),
    /// Credentials accepted, a code was sent and must be verified
    TwoFactorRequired { email: String },
}
