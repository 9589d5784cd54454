//! Store traits and their PostgreSQL implementations.
//!
//! The auth core depends only on these traits, so flows can be exercised
//! against the in-memory stores in [`super::memory`].

#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::timeouts::with_default_timeout;
use crate::auth::{AuthError, AuthResult, Identity, IdentityId, SessionRecord};

/// Identity and credential persistence
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find identity by e-mail (already normalized by the caller)
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>>;

    /// Find identity by ID
    async fn find_by_id(&self, id: IdentityId) -> AuthResult<Option<Identity>>;

    /// Mirror a failed login into the durable row
    async fn record_login_failure(
        &self,
        id: IdentityId,
        locked_until: Option<DateTime<Utc>>,
    ) -> AuthResult<()>;

    /// Reset failure counters and stamp the last login
    async fn record_login_success(&self, id: IdentityId, ip: Option<&str>) -> AuthResult<()>;

    /// Replace the password hash and stamp `password_changed_at`
    async fn update_password(&self, id: IdentityId, password_hash: &str) -> AuthResult<()>;

    /// Mark the e-mail as verified. Returns false for an unknown e-mail.
    async fn mark_email_verified(&self, email: &str) -> AuthResult<bool>;

    /// Store the hash of a password reset token
    async fn insert_password_reset_token(
        &self,
        id: IdentityId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()>;

    /// Consume a live, unused reset token. Succeeds at most once per token.
    async fn consume_password_reset_token(&self, token_hash: &str)
    -> AuthResult<Option<IdentityId>>;
}

/// Session audit persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session record
    async fn insert(&self, record: &SessionRecord) -> AuthResult<()>;

    /// Find a session by ID
    async fn find(&self, session_id: Uuid) -> AuthResult<Option<SessionRecord>>;

    /// Unrevoked, unexpired sessions of an identity, newest first
    async fn active_for_identity(&self, identity_id: IdentityId)
    -> AuthResult<Vec<SessionRecord>>;

    /// Stamp `revoked_at` on one session
    async fn mark_revoked(&self, session_id: Uuid) -> AuthResult<()>;

    /// Stamp `revoked_at` on every live session of an identity
    async fn mark_all_revoked(&self, identity_id: IdentityId) -> AuthResult<u64>;
}

/// Role and permission relations
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Role slugs held by an identity
    async fn roles_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>>;

    /// Permission slugs granted through every role of an identity
    async fn permissions_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>>;

    /// Grant a role. Returns false if it was already held.
    async fn assign_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool>;

    /// Withdraw a role. Returns false if it was not held.
    async fn remove_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool>;
}

const IDENTITY_COLUMNS: &str = "id, email, phone, password_hash, status, two_factor_enabled, \
     failed_attempts, locked_until, password_changed_at, email_verified_at, last_login_at, \
     created_at";

fn identity_from_row(row: &PgRow) -> Result<Identity, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
        status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        two_factor_enabled: row.try_get("two_factor_enabled")?,
        failed_attempts: row.try_get("failed_attempts")?,
        locked_until: row.try_get("locked_until")?,
        password_changed_at: row.try_get("password_changed_at")?,
        email_verified_at: row.try_get("email_verified_at")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, sqlx::Error> {
    Ok(SessionRecord {
        session_id: row.try_get("session_id")?,
        identity_id: row.try_get("identity_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        client_fingerprint: row.try_get("client_fingerprint")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

/// Default PostgreSQL implementation of `CredentialStore`
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE email = $1");
        let row = with_default_timeout(sqlx::query(&query).bind(email).fetch_optional(&self.pool))
            .await?;
        Ok(row.as_ref().map(identity_from_row).transpose()?)
    }

    async fn find_by_id(&self, id: IdentityId) -> AuthResult<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1");
        let row =
            with_default_timeout(sqlx::query(&query).bind(id).fetch_optional(&self.pool)).await?;
        Ok(row.as_ref().map(identity_from_row).transpose()?)
    }

    async fn record_login_failure(
        &self,
        id: IdentityId,
        locked_until: Option<DateTime<Utc>>,
    ) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query(
                r#"
                UPDATE identities
                SET failed_attempts = failed_attempts + 1,
                    locked_until = COALESCE($2, locked_until),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(locked_until)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_login_success(&self, id: IdentityId, ip: Option<&str>) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query(
                r#"
                UPDATE identities
                SET failed_attempts = 0,
                    locked_until = NULL,
                    last_login_at = NOW(),
                    last_login_ip = $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(ip)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_password(&self, id: IdentityId, password_hash: &str) -> AuthResult<()> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE identities
                SET password_hash = $2, password_changed_at = NOW(), updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::IdentityNotFound);
        }
        Ok(())
    }

    async fn mark_email_verified(&self, email: &str) -> AuthResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE identities
                SET email_verified_at = COALESCE(email_verified_at, NOW()), updated_at = NOW()
                WHERE email = $1
                "#,
            )
            .bind(email)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_password_reset_token(
        &self,
        id: IdentityId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO password_reset_tokens (identity_id, token_hash, expires_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn consume_password_reset_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<IdentityId>> {
        let identity_id: Option<Uuid> = with_default_timeout(
            sqlx::query_scalar(
                r#"
                UPDATE password_reset_tokens
                SET used_at = NOW()
                WHERE token_hash = $1 AND used_at IS NULL AND expires_at > NOW()
                RETURNING identity_id
                "#,
            )
            .bind(token_hash)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(identity_id)
    }
}

/// Default PostgreSQL implementation of `SessionStore`
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, record: &SessionRecord) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO sessions
                    (session_id, identity_id, issued_at, expires_at, client_fingerprint,
                     ip_address, user_agent)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.session_id)
            .bind(record.identity_id)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(&record.client_fingerprint)
            .bind(&record.ip_address)
            .bind(&record.user_agent)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find(&self, session_id: Uuid) -> AuthResult<Option<SessionRecord>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT session_id, identity_id, issued_at, expires_at, client_fingerprint,
                       ip_address, user_agent, revoked_at
                FROM sessions
                WHERE session_id = $1
                "#,
            )
            .bind(session_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn active_for_identity(
        &self,
        identity_id: IdentityId,
    ) -> AuthResult<Vec<SessionRecord>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT session_id, identity_id, issued_at, expires_at, client_fingerprint,
                       ip_address, user_agent, revoked_at
                FROM sessions
                WHERE identity_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
                ORDER BY issued_at DESC
                "#,
            )
            .bind(identity_id)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_revoked(&self, session_id: Uuid) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query(
                "UPDATE sessions SET revoked_at = NOW() WHERE session_id = $1 AND revoked_at IS NULL",
            )
            .bind(session_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn mark_all_revoked(&self, identity_id: IdentityId) -> AuthResult<u64> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE sessions SET revoked_at = NOW()
                WHERE identity_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
                "#,
            )
            .bind(identity_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

/// Default PostgreSQL implementation of `RoleStore`
pub struct PgRoleStore {
    pool: PgPool,
}

impl PgRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    async fn roles_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>> {
        let roles: Vec<String> = with_default_timeout(
            sqlx::query_scalar(
                r#"
                SELECT r.slug
                FROM roles r
                JOIN identity_roles ir ON ir.role_id = r.id
                WHERE ir.identity_id = $1
                ORDER BY r.slug
                "#,
            )
            .bind(identity_id)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(roles)
    }

    async fn permissions_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>> {
        let permissions: Vec<String> = with_default_timeout(
            sqlx::query_scalar(
                r#"
                SELECT DISTINCT p.slug
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                JOIN identity_roles ir ON ir.role_id = rp.role_id
                WHERE ir.identity_id = $1
                ORDER BY p.slug
                "#,
            )
            .bind(identity_id)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(permissions)
    }

    async fn assign_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        let role_id: Option<i32> = with_default_timeout(
            sqlx::query_scalar("SELECT id FROM roles WHERE slug = $1")
                .bind(role_slug)
                .fetch_optional(&self.pool),
        )
        .await?;
        let role_id = role_id.ok_or_else(|| AuthError::RoleNotFound(role_slug.to_string()))?;

        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO identity_roles (identity_id, role_id)
                VALUES ($1, $2)
                ON CONFLICT (identity_id, role_id) DO NOTHING
                "#,
            )
            .bind(identity_id)
            .bind(role_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                DELETE FROM identity_roles ir
                USING roles r
                WHERE ir.role_id = r.id AND ir.identity_id = $1 AND r.slug = $2
                "#,
            )
            .bind(identity_id)
            .bind(role_slug)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
