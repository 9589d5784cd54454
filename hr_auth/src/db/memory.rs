//! In-memory store implementations.
//!
//! Back the auth flows in tests and single-process demos without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::{CredentialStore, RoleStore, SessionStore};
use crate::auth::{
    AuthError, AuthResult, Identity, IdentityId, IdentityStatus, SessionRecord,
};

#[derive(Debug, Clone)]
struct ResetToken {
    identity_id: IdentityId,
    expires_at: DateTime<Utc>,
    used: bool,
}

/// Credential store held in memory
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    identities: Arc<RwLock<HashMap<IdentityId, Identity>>>,
    reset_tokens: Arc<RwLock<HashMap<String, ResetToken>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an identity
    pub async fn insert(&self, identity: Identity) {
        self.identities.write().await.insert(identity.id, identity);
    }

    /// Build and insert an active identity with the given hash
    pub async fn create(&self, email: &str, password_hash: &str) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            phone: None,
            password_hash: password_hash.to_string(),
            status: IdentityStatus::Active,
            two_factor_enabled: false,
            failed_attempts: 0,
            locked_until: None,
            password_changed_at: None,
            email_verified_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        };
        self.insert(identity.clone()).await;
        identity
    }

    /// Apply a change to a stored identity
    pub async fn update<F>(&self, id: IdentityId, change: F) -> bool
    where
        F: FnOnce(&mut Identity),
    {
        match self.identities.write().await.get_mut(&id) {
            Some(identity) => {
                change(identity);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a stored identity
    pub async fn get(&self, id: IdentityId) -> Option<Identity> {
        self.identities.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|i| i.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: IdentityId) -> AuthResult<Option<Identity>> {
        Ok(self.get(id).await)
    }

    async fn record_login_failure(
        &self,
        id: IdentityId,
        locked_until: Option<DateTime<Utc>>,
    ) -> AuthResult<()> {
        self.update(id, |identity| {
            identity.failed_attempts += 1;
            if locked_until.is_some() {
                identity.locked_until = locked_until;
            }
        })
        .await;
        Ok(())
    }

    async fn record_login_success(&self, id: IdentityId, _ip: Option<&str>) -> AuthResult<()> {
        self.update(id, |identity| {
            identity.failed_attempts = 0;
            identity.locked_until = None;
            identity.last_login_at = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn update_password(&self, id: IdentityId, password_hash: &str) -> AuthResult<()> {
        let updated = self
            .update(id, |identity| {
                identity.password_hash = password_hash.to_string();
                identity.password_changed_at = Some(Utc::now());
            })
            .await;

        if updated {
            Ok(())
        } else {
            Err(AuthError::IdentityNotFound)
        }
    }

    async fn mark_email_verified(&self, email: &str) -> AuthResult<bool> {
        let mut identities = self.identities.write().await;
        match identities.values_mut().find(|i| i.email.eq_ignore_ascii_case(email)) {
            Some(identity) => {
                identity.email_verified_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_password_reset_token(
        &self,
        id: IdentityId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        self.reset_tokens.write().await.insert(
            token_hash.to_string(),
            ResetToken {
                identity_id: id,
                expires_at,
                used: false,
            },
        );
        Ok(())
    }

    async fn consume_password_reset_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<IdentityId>> {
        let mut tokens = self.reset_tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(token) if !token.used && token.expires_at > Utc::now() => {
                token.used = true;
                Ok(Some(token.identity_id))
            }
            _ => Ok(None),
        }
    }
}

/// Session store held in memory
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, record: &SessionRecord) -> AuthResult<()> {
        self.sessions
            .write()
            .await
            .insert(record.session_id, record.clone());
        Ok(())
    }

    async fn find(&self, session_id: Uuid) -> AuthResult<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn active_for_identity(
        &self,
        identity_id: IdentityId,
    ) -> AuthResult<Vec<SessionRecord>> {
        let now = Utc::now();
        let mut active: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.identity_id == identity_id && s.revoked_at.is_none() && s.expires_at > now)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(active)
    }

    async fn mark_revoked(&self, session_id: Uuid) -> AuthResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.revoked_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn mark_all_revoked(&self, identity_id: IdentityId) -> AuthResult<u64> {
        let now = Utc::now();
        let mut revoked = 0;
        for session in self.sessions.write().await.values_mut() {
            if session.identity_id == identity_id
                && session.revoked_at.is_none()
                && session.expires_at > now
            {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

/// Role store held in memory
#[derive(Clone, Default)]
pub struct MemoryRoleStore {
    roles: Arc<RwLock<HashMap<String, Vec<String>>>>,
    assignments: Arc<RwLock<HashMap<IdentityId, BTreeSet<String>>>>,
    permission_loads: Arc<AtomicUsize>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a role and the permission slugs it grants
    pub async fn define_role(&self, slug: &str, permissions: &[&str]) {
        self.roles.write().await.insert(
            slug.to_string(),
            permissions.iter().map(|p| p.to_string()).collect(),
        );
    }

    /// How many times permissions were loaded from this store
    pub fn permission_loads(&self) -> usize {
        self.permission_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn roles_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(&identity_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn permissions_for_identity(&self, identity_id: IdentityId) -> AuthResult<Vec<String>> {
        self.permission_loads.fetch_add(1, Ordering::SeqCst);

        let assignments = self.assignments.read().await;
        let roles = self.roles.read().await;
        let permissions: BTreeSet<String> = assignments
            .get(&identity_id)
            .into_iter()
            .flatten()
            .filter_map(|role| roles.get(role))
            .flatten()
            .cloned()
            .collect();
        Ok(permissions.into_iter().collect())
    }

    async fn assign_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        if !self.roles.read().await.contains_key(role_slug) {
            return Err(AuthError::RoleNotFound(role_slug.to_string()));
        }
        Ok(self
            .assignments
            .write()
            .await
            .entry(identity_id)
            .or_default()
            .insert(role_slug.to_string()))
    }

    async fn remove_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        Ok(self
            .assignments
            .write()
            .await
            .get_mut(&identity_id)
            .is_some_and(|roles| roles.remove(role_slug)))
    }
}
