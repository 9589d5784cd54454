//! Authentication service orchestrating the login, two-factor, refresh,
//! logout and password flows.

use super::{
    errors::{AuthError, AuthResult},
    models::{
        AuthenticatedSession, ChangePasswordRequest, ClientInfo, CurrentIdentity, Identity,
        IdentityId, LoginOutcome, LoginRequest, PasswordResetConfirm, PasswordResetRequest,
        SendOtpRequest, SessionRecord, TwoFactorRequest, VerifyOtpRequest,
    },
};
use crate::{
    cache::{MemoryCache, SharedCache},
    config::AuthConfig,
    db::{CredentialStore, RoleStore, SessionStore},
    lockout::{Admission, AttemptState, LoginAttemptGovernor},
    otp::{NoopDispatcher, OtpDispatcher, OtpEngine, OtpPurpose},
    password::PasswordManager,
    permissions::{self, PermissionResolver},
    rate_limit::RateLimiter,
    session::SessionRegistry,
    tokens::{TokenIssuer, TokenSubject, TokenType},
};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{future::Future, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::db::timeouts::DEFAULT_REQUEST_DEADLINE;

/// Builder for [`AuthService`]
pub struct AuthServiceBuilder {
    config: AuthConfig,
    cache: Option<Arc<dyn SharedCache>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    roles: Option<Arc<dyn RoleStore>>,
    dispatcher: Option<Arc<dyn OtpDispatcher>>,
    request_deadline: Duration,
}

impl AuthServiceBuilder {
    pub fn cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn roles(mut self, store: Arc<dyn RoleStore>) -> Self {
        self.roles = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn OtpDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Upper bound on the duration of one flow (default 30s)
    pub fn request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// Assemble the service.
    ///
    /// The cache defaults to a [`MemoryCache`] and the dispatcher to
    /// [`NoopDispatcher`]; the three stores are required.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for a missing store or invalid
    /// configuration, `AuthError::HashingFailed` for bad Argon2 parameters
    pub fn build(self) -> AuthResult<AuthService> {
        self.config
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let credentials = self
            .credentials
            .ok_or_else(|| AuthError::Validation("credential store is required".into()))?;
        let session_store = self
            .sessions
            .ok_or_else(|| AuthError::Validation("session store is required".into()))?;
        let role_store = self
            .roles
            .ok_or_else(|| AuthError::Validation("role store is required".into()))?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let dispatcher = self.dispatcher.unwrap_or_else(|| Arc::new(NoopDispatcher));

        let security = &self.config.security;
        let passwords = PasswordManager::new(security)?;
        let dummy_hash = passwords.hash("timing-equalization-placeholder")?;

        Ok(AuthService {
            otp: OtpEngine::new(cache.clone(), dispatcher, security),
            tokens: TokenIssuer::new(&self.config.jwt),
            sessions: SessionRegistry::new(cache.clone(), session_store),
            lockout: LoginAttemptGovernor::new(cache.clone(), security),
            rate_limiter: RateLimiter::new(cache.clone(), self.config.rate_limits.clone()),
            permissions: PermissionResolver::new(cache, role_store, security.permission_cache_ttl),
            password_reset_expiry: security.password_reset_expiry,
            passwords,
            credentials,
            dummy_hash: Arc::from(dummy_hash),
            request_deadline: self.request_deadline,
        })
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    passwords: PasswordManager,
    otp: OtpEngine,
    tokens: TokenIssuer,
    sessions: SessionRegistry,
    lockout: LoginAttemptGovernor,
    rate_limiter: RateLimiter,
    permissions: PermissionResolver,
    credentials: Arc<dyn CredentialStore>,
    password_reset_expiry: Duration,
    dummy_hash: Arc<str>,
    request_deadline: Duration,
}

/// Trim and lowercase an e-mail, rejecting obviously malformed input
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AuthError::Validation("Invalid email address".to_string()));
    }
    Ok(email)
}

/// Two-factor codes are reachable only through the login flow
fn ensure_self_service(purpose: OtpPurpose) -> AuthResult<()> {
    if purpose.is_self_service() {
        Ok(())
    } else {
        Err(AuthError::Validation(format!(
            "Codes for {purpose} are issued by login"
        )))
    }
}

fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

impl AuthService {
    pub fn builder(config: AuthConfig) -> AuthServiceBuilder {
        AuthServiceBuilder {
            config,
            cache: None,
            credentials: None,
            sessions: None,
            roles: None,
            dispatcher: None,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn permissions(&self) -> &PermissionResolver {
        &self.permissions
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn passwords(&self) -> &PasswordManager {
        &self.passwords
    }

    pub fn lockout(&self) -> &LoginAttemptGovernor {
        &self.lockout
    }

    async fn within<T, F>(&self, flow: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        tokio::time::timeout(self.request_deadline, flow)
            .await
            .map_err(|_| AuthError::Timeout(self.request_deadline))?
    }

    /// First login step: check lockout, verify the password, then either
    /// issue a session or send a two-factor code.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        self.within(self.login_flow(request, client)).await
    }

    async fn login_flow(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(&request.email)?;
        if request.password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        let admission = self.admit(&email).await?;

        let Some(identity) = self.credentials.find_by_email(&email).await? else {
            // Same work as a wrong password so response time does not reveal
            // whether the e-mail exists
            self.passwords
                .verify_blocking(request.password, self.dummy_hash.to_string())
                .await?;
            log::info!("Login failed for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let verified = self
            .passwords
            .verify_blocking(request.password.clone(), identity.password_hash.clone())
            .await?;
        if !verified {
            self.record_password_failure(&identity, admission).await;
            return Err(AuthError::InvalidCredentials);
        }
        self.lockout.clear(&email).await?;

        if !identity.is_active() {
            log::info!(
                "Login refused for {} identity {}",
                identity.status,
                identity.id
            );
            return Err(AuthError::AccountInactive);
        }

        if identity.two_factor_enabled {
            self.otp.begin_login_challenge(&email, identity.id).await?;
            return Ok(LoginOutcome::TwoFactorRequired { email });
        }

        let session = self
            .complete_login(&identity, client, Some(&request.password))
            .await?;
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Reserve an attempt for `email`, refusing it while locked
    async fn admit(&self, email: &str) -> AuthResult<Admission> {
        let admission = self.lockout.reserve_attempt(email).await?;
        match admission {
            Admission::Locked { remaining } => Err(AuthError::AccountLocked { remaining }),
            Admission::Admitted { .. } => Ok(admission),
        }
    }

    /// Mirror a rejected password onto the identity row for auditing
    async fn record_password_failure(&self, identity: &Identity, admission: Admission) {
        let locked_until = match admission {
            Admission::Admitted { last: true, .. } => {
                match self.lockout.state(&identity.email).await {
                    Ok(AttemptState::Locked { remaining }) => chrono::Duration::from_std(remaining)
                        .ok()
                        .map(|remaining| Utc::now() + remaining),
                    _ => None,
                }
            }
            _ => None,
        };

        if let Err(e) = self
            .credentials
            .record_login_failure(identity.id, locked_until)
            .await
        {
            log::warn!("Failed to mirror login failure for {}: {e}", identity.id);
        }
        log::info!("Login failed for identity {}", identity.id);
    }

    /// Issue tokens and record the session for an identity whose credentials
    /// (and second factor, if any) were accepted
    async fn complete_login(
        &self,
        identity: &Identity,
        client: &ClientInfo,
        password: Option<&str>,
    ) -> AuthResult<AuthenticatedSession> {
        let session = self.issue_session(identity, client).await?;

        if let Err(e) = self
            .credentials
            .record_login_success(identity.id, client.ip.as_deref())
            .await
        {
            log::warn!("Failed to record last login for {}: {e}", identity.id);
        }

        if let Some(password) = password {
            self.rehash_if_needed(identity, password).await;
        }

        log::info!(
            "Identity {} logged in, session {}",
            identity.id,
            session.tokens.session_id
        );
        Ok(session)
    }

    async fn issue_session(
        &self,
        identity: &Identity,
        client: &ClientInfo,
    ) -> AuthResult<AuthenticatedSession> {
        let grants = self.permissions.resolve(identity.id).await?;
        let tokens = self.tokens.issue_pair(TokenSubject {
            id: identity.id,
            email: &identity.email,
            roles: &grants.roles,
            permissions: &grants.permissions,
        })?;
        self.sessions
            .store_session(identity.id, &tokens, client)
            .await?;

        Ok(AuthenticatedSession {
            identity: CurrentIdentity {
                id: identity.id,
                email: identity.email.clone(),
                roles: grants.roles,
                permissions: grants.permissions,
                session_id: tokens.session_id,
            },
            tokens,
        })
    }

    async fn rehash_if_needed(&self, identity: &Identity, password: &str) {
        if !self.passwords.needs_rehash(&identity.password_hash) {
            return;
        }
        let rehashed = match self.passwords.hash_blocking(password.to_string()).await {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("Failed to rehash password for {}: {e}", identity.id);
                return;
            }
        };
        match self.credentials.update_password(identity.id, &rehashed).await {
            Ok(()) => log::info!("Upgraded password hash for {}", identity.id),
            Err(e) => log::warn!("Failed to store rehashed password for {}: {e}", identity.id),
        }
    }

    /// Second login step: check the emailed code and issue the session
    pub async fn verify_two_factor(
        &self,
        request: TwoFactorRequest,
        client: &ClientInfo,
    ) -> AuthResult<AuthenticatedSession> {
        self.within(async {
            let email = normalize_email(&request.email)?;

            let Some(pending) = self.otp.pending_login(&email).await? else {
                return Err(AuthError::OtpExpired);
            };
            self.admit(&email).await?;

            self.otp
                .verify(&email, OtpPurpose::TwoFactor, &request.code)
                .await?
                .into_result()?;
            self.otp.end_login_challenge(&email).await?;
            self.lockout.clear(&email).await?;

            let identity = self
                .credentials
                .find_by_id(pending)
                .await?
                .ok_or(AuthError::InvalidCredentials)?;
            if !identity.two_factor_enabled {
                log::warn!("Two-factor challenge for {email} no longer matches identity {pending}");
                return Err(AuthError::InvalidCredentials);
            }
            if !identity.is_active() {
                return Err(AuthError::AccountInactive);
            }

            self.complete_login(&identity, client, None).await
        })
        .await
    }

    /// Rotate a refresh token: issue a new pair, then revoke the old session.
    ///
    /// The new session is persisted before the old one is revoked, so a
    /// failure or deadline part way through leaves the presented token
    /// usable. Revocation is set-if-absent: of two concurrent refreshes with
    /// the same token only one keeps its new pair, and the loser's pair is
    /// revoked before it is returned to anyone.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<AuthenticatedSession> {
        self.within(async {
            let claims = self.tokens.validate(refresh_token, TokenType::Refresh)?;
            if self.sessions.is_revoked(claims.sid).await? {
                log::warn!("Refresh attempted with revoked session {}", claims.sid);
                return Err(AuthError::SessionRevoked);
            }

            let identity = self
                .credentials
                .find_by_id(claims.sub)
                .await?
                .ok_or(AuthError::TokenInvalid)?;
            if !identity.is_active() {
                return Err(AuthError::AccountInactive);
            }

            let rotated = self.issue_session(&identity, client).await?;

            if !self
                .sessions
                .revoke(claims.sid, claims.remaining_lifetime())
                .await?
            {
                log::warn!("Concurrent refresh detected for session {}", claims.sid);
                self.sessions
                    .revoke(rotated.tokens.session_id, self.tokens.refresh_ttl())
                    .await?;
                return Err(AuthError::SessionRevoked);
            }

            Ok(rotated)
        })
        .await
    }

    /// Revoke one session for the rest of its refresh lifetime
    pub async fn logout(&self, session_id: Uuid) -> AuthResult<()> {
        self.within(async {
            let record = match self.sessions.find(session_id).await {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Session lookup failed during logout of {session_id}: {e}");
                    None
                }
            };

            let ttl = record
                .as_ref()
                .and_then(|r| (r.expires_at - Utc::now()).to_std().ok())
                .unwrap_or_else(|| self.tokens.refresh_ttl());
            self.sessions.revoke(session_id, ttl).await?;

            if let Some(record) = record {
                if let Err(e) = self.permissions.invalidate(record.identity_id).await {
                    log::warn!("Failed to evict permissions on logout: {e}");
                }
            }

            log::info!("Session {session_id} logged out");
            Ok(())
        })
        .await
    }

    /// Validate an access token, check revocation and resolve the caller's
    /// current roles and permissions
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<CurrentIdentity> {
        self.within(async {
            let claims = self.tokens.validate(access_token, TokenType::Access)?;
            if self.sessions.is_revoked(claims.sid).await? {
                return Err(AuthError::SessionRevoked);
            }

            let grants = self.permissions.resolve(claims.sub).await?;
            Ok(CurrentIdentity {
                id: claims.sub,
                email: claims.email,
                roles: grants.roles,
                permissions: grants.permissions,
                session_id: claims.sid,
            })
        })
        .await
    }

    /// Fail with `PermissionDenied` unless the identity holds any of `required`
    pub fn require_permission(
        &self,
        identity: &CurrentIdentity,
        required: &[&str],
    ) -> AuthResult<()> {
        if permissions::has_any(&identity.permissions, required) {
            Ok(())
        } else {
            log::info!(
                "Identity {} denied, requires one of {:?}",
                identity.id,
                required
            );
            Err(AuthError::PermissionDenied)
        }
    }

    /// Change password, then revoke every session of the identity
    pub async fn change_password(
        &self,
        identity: &CurrentIdentity,
        request: ChangePasswordRequest,
    ) -> AuthResult<()> {
        self.within(async {
            let stored = self
                .credentials
                .find_by_id(identity.id)
                .await?
                .ok_or(AuthError::IdentityNotFound)?;

            let admission = self.admit(&stored.email).await?;
            let verified = self
                .passwords
                .verify_blocking(request.old_password.clone(), stored.password_hash.clone())
                .await?;
            if !verified {
                self.record_password_failure(&stored, admission).await;
                return Err(AuthError::InvalidCredentials);
            }
            self.lockout.clear(&stored.email).await?;

            if request.old_password == request.new_password {
                return Err(AuthError::Validation(
                    "New password must differ from the current one".to_string(),
                ));
            }
            self.passwords.validate(&request.new_password)?;

            let hash = self.passwords.hash_blocking(request.new_password).await?;
            self.credentials.update_password(stored.id, &hash).await?;
            self.sessions.revoke_all(stored.id).await?;
            self.permissions.invalidate(stored.id).await?;

            log::info!("Password changed for identity {}", stored.id);
            Ok(())
        })
        .await
    }

    /// Send a reset token to a known, active identity.
    ///
    /// Succeeds without sending anything for an unknown e-mail.
    pub async fn request_password_reset(&self, request: PasswordResetRequest) -> AuthResult<()> {
        self.within(async {
            let email = normalize_email(&request.email)?;
            let Some(identity) = self.credentials.find_by_email(&email).await? else {
                log::info!("Password reset requested for unknown email");
                return Ok(());
            };
            if !identity.is_active() {
                log::info!("Password reset requested for inactive identity {}", identity.id);
                return Ok(());
            }

            let mut raw = [0u8; 32];
            rand::rng().fill(&mut raw);
            let token = hex::encode(raw);

            let expires_at = Utc::now()
                + chrono::Duration::from_std(self.password_reset_expiry)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
            self.credentials
                .insert_password_reset_token(identity.id, &hash_reset_token(&token), expires_at)
                .await?;

            if let Err(e) = self
                .otp
                .dispatcher()
                .dispatch_reset(&email, &token, self.password_reset_expiry)
                .await
            {
                log::error!("Failed to deliver reset token to {}: {e}", identity.id);
            }
            Ok(())
        })
        .await
    }

    /// Consume a reset token, store the new password and revoke every session
    pub async fn reset_password(&self, request: PasswordResetConfirm) -> AuthResult<()> {
        self.within(async {
            self.passwords.validate(&request.new_password)?;

            let identity_id = self
                .credentials
                .consume_password_reset_token(&hash_reset_token(&request.token))
                .await?
                .ok_or(AuthError::InvalidResetToken)?;

            let hash = self.passwords.hash_blocking(request.new_password).await?;
            self.credentials.update_password(identity_id, &hash).await?;
            self.sessions.revoke_all(identity_id).await?;

            if let Some(identity) = self.credentials.find_by_id(identity_id).await? {
                self.lockout.clear(&identity.email).await?;
            }

            log::info!("Password reset completed for identity {identity_id}");
            Ok(())
        })
        .await
    }

    /// Send a code for a self-service purpose, rate limited per e-mail
    pub async fn send_otp(&self, request: SendOtpRequest) -> AuthResult<()> {
        self.within(async {
            let email = normalize_email(&request.email)?;
            ensure_self_service(request.purpose)?;
            self.rate_limiter
                .check_identifier("otp", &email, self.rate_limiter.rules().otp)
                .await?
                .enforce()?;

            if self.credentials.find_by_email(&email).await?.is_none() {
                log::info!("OTP requested for unknown email");
                return Ok(());
            }

            self.otp.issue(&email, request.purpose).await
        })
        .await
    }

    /// Verify a code for a self-service purpose
    pub async fn verify_otp(&self, request: VerifyOtpRequest) -> AuthResult<()> {
        self.within(async {
            let email = normalize_email(&request.email)?;
            ensure_self_service(request.purpose)?;
            self.otp
                .verify(&email, request.purpose, &request.code)
                .await?
                .into_result()?;

            if request.purpose == OtpPurpose::EmailVerification
                && !self.credentials.mark_email_verified(&email).await?
            {
                log::warn!("Verified email code for an email with no identity");
            }
            Ok(())
        })
        .await
    }

    /// Live sessions of the caller, newest first
    pub async fn list_sessions(&self, identity: &CurrentIdentity) -> AuthResult<Vec<SessionRecord>> {
        self.within(self.sessions.list(identity.id)).await
    }

    /// Revoke every session of an identity
    pub async fn revoke_all_sessions(&self, identity_id: IdentityId) -> AuthResult<usize> {
        self.within(self.sessions.revoke_all(identity_id)).await
    }

    /// Grant a role; the permission cache entry is evicted in the same call
    pub async fn assign_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        self.within(self.permissions.assign_role(identity_id, role_slug))
            .await
    }

    /// Withdraw a role; the permission cache entry is evicted in the same call
    pub async fn remove_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        self.within(self.permissions.remove_role(identity_id, role_slug))
            .await
    }
}
