//! Session registry and revocation list.
//!
//! Session records are durable audit rows. Revocation is a negative cache:
//! a `blacklist:<session id>` entry means "reject", and it expires together
//! with the refresh token it shadows. Revocation writes and revocation
//! checks both propagate cache errors so callers fail closed.

use crate::{
    auth::{AuthResult, ClientInfo, IdentityId, SessionRecord},
    cache::{SharedCache, cache_key},
    db::SessionStore,
    tokens::TokenPair,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

/// Shortest TTL given to a revocation entry
const MIN_REVOCATION_TTL: Duration = Duration::from_secs(1);

fn revocation_key(session_id: Uuid) -> String {
    cache_key("blacklist", session_id)
}

#[derive(Clone)]
pub struct SessionRegistry {
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(cache: Arc<dyn SharedCache>, store: Arc<dyn SessionStore>) -> Self {
        Self { cache, store }
    }

    /// Persist the audit record for a freshly issued pair
    pub async fn store_session(
        &self,
        identity_id: IdentityId,
        tokens: &TokenPair,
        client: &ClientInfo,
    ) -> AuthResult<SessionRecord> {
        let record = SessionRecord {
            session_id: tokens.session_id,
            identity_id,
            issued_at: Utc::now(),
            expires_at: tokens.refresh_expires_at,
            client_fingerprint: client.fingerprint(),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            revoked_at: None,
        };
        self.store.insert(&record).await?;
        Ok(record)
    }

    /// Add a session to the revocation list for `ttl`.
    ///
    /// Returns false if it was already revoked. The audit row is stamped on a
    /// best-effort basis; the cache write is what takes effect.
    pub async fn revoke(&self, session_id: Uuid, ttl: Duration) -> AuthResult<bool> {
        let newly_revoked = self
            .cache
            .set_if_absent(
                &revocation_key(session_id),
                "revoked",
                ttl.max(MIN_REVOCATION_TTL),
            )
            .await?;

        if newly_revoked {
            if let Err(e) = self.store.mark_revoked(session_id).await {
                log::warn!("Failed to stamp revocation on session {session_id}: {e}");
            }
        }
        Ok(newly_revoked)
    }

    pub async fn is_revoked(&self, session_id: Uuid) -> AuthResult<bool> {
        Ok(self.cache.exists(&revocation_key(session_id)).await?)
    }

    /// Revoke every live session of an identity. Returns how many were revoked.
    pub async fn revoke_all(&self, identity_id: IdentityId) -> AuthResult<usize> {
        let sessions = self.store.active_for_identity(identity_id).await?;
        let now = Utc::now();

        let mut revoked = 0;
        for session in &sessions {
            let remaining = (session.expires_at - now).to_std().unwrap_or_default();
            if self.revoke(session.session_id, remaining).await? {
                revoked += 1;
            }
        }

        if let Err(e) = self.store.mark_all_revoked(identity_id).await {
            log::warn!("Failed to stamp revocations for identity {identity_id}: {e}");
        }

        log::info!("Revoked {revoked} sessions for identity {identity_id}");
        Ok(revoked)
    }

    /// Live sessions of an identity, newest first
    pub async fn list(&self, identity_id: IdentityId) -> AuthResult<Vec<SessionRecord>> {
        self.store.active_for_identity(identity_id).await
    }

    pub async fn find(&self, session_id: Uuid) -> AuthResult<Option<SessionRecord>> {
        self.store.find(session_id).await
    }
}
