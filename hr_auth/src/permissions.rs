//! Role to permission resolution with caching.
//!
//! A permission slug is `module.action`. A held slug satisfies a requirement
//! when it is identical, when it is `module.*` and the requirement starts
//! with `module.`, or when it is the superuser slug `*`.

use crate::{
    auth::{AuthResult, IdentityId},
    cache::{CacheResult, SharedCache, cache_key},
    db::RoleStore,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

/// Slug that satisfies every requirement
pub const SUPERUSER_PERMISSION: &str = "*";

/// Whether one held slug satisfies one required slug
pub fn permission_matches(held: &str, required: &str) -> bool {
    if held == required || held == SUPERUSER_PERMISSION {
        return true;
    }
    match held.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') && prefix.len() > 1 => {
            required.len() > prefix.len() && required.starts_with(prefix)
        }
        _ => false,
    }
}

/// True if any requirement is satisfied. False for an empty requirement list.
pub fn has_any<S: AsRef<str>>(held: &[S], required: &[&str]) -> bool {
    required
        .iter()
        .any(|r| held.iter().any(|h| permission_matches(h.as_ref(), r)))
}

/// True if every requirement is satisfied
pub fn has_all<S: AsRef<str>>(held: &[S], required: &[&str]) -> bool {
    required
        .iter()
        .all(|r| held.iter().any(|h| permission_matches(h.as_ref(), r)))
}

/// Roles and effective permissions of an identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl PermissionSet {
    /// Build a de-duplicated, sorted set
    pub fn new(
        roles: impl IntoIterator<Item = String>,
        permissions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            roles: roles.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
            permissions: permissions
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

/// How many cache lifetimes a generation counter outlives its entries
const GENERATION_TTL_FACTOR: u32 = 4;

/// Resolves and caches permission sets.
///
/// Cached sets are keyed by a per-identity generation that every role change
/// bumps. A load that raced a role change can only write under the old
/// generation, which no later read consults.
#[derive(Clone)]
pub struct PermissionResolver {
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn RoleStore>,
    ttl: Duration,
}

impl PermissionResolver {
    pub fn new(cache: Arc<dyn SharedCache>, store: Arc<dyn RoleStore>, ttl: Duration) -> Self {
        Self { cache, store, ttl }
    }

    fn generation_key(identity_id: IdentityId) -> String {
        cache_key("permissions_gen", identity_id)
    }

    fn key(identity_id: IdentityId, generation: i64) -> String {
        cache_key("permissions", format!("{identity_id}:{generation}"))
    }

    async fn generation(&self, identity_id: IdentityId) -> CacheResult<i64> {
        let current = self.cache.get(&Self::generation_key(identity_id)).await?;
        Ok(current.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Cached roles and permissions, loaded from the store on a miss.
    ///
    /// Cache failures degrade to a direct store read.
    pub async fn resolve(&self, identity_id: IdentityId) -> AuthResult<PermissionSet> {
        let generation = match self.generation(identity_id).await {
            Ok(generation) => generation,
            Err(e) => {
                log::warn!("Permission cache unavailable, reading store directly: {e}");
                return self.load(identity_id).await;
            }
        };
        let key = Self::key(identity_id, generation);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(set) => return Ok(set),
                Err(e) => log::warn!("Discarding unreadable permission cache entry {key}: {e}"),
            },
            Ok(None) => {}
            Err(e) => {
                log::warn!("Permission cache unavailable, reading store directly: {e}");
                return self.load(identity_id).await;
            }
        }

        let set = self.load(identity_id).await?;
        match serde_json::to_string(&set) {
            Ok(json) => {
                if let Err(e) = self.cache.set(&key, &json, self.ttl).await {
                    log::warn!("Failed to cache permissions for {identity_id}: {e}");
                }
            }
            Err(e) => log::warn!("Failed to encode permissions for {identity_id}: {e}"),
        }
        Ok(set)
    }

    async fn load(&self, identity_id: IdentityId) -> AuthResult<PermissionSet> {
        let roles = self.store.roles_for_identity(identity_id).await?;
        let permissions = self.store.permissions_for_identity(identity_id).await?;
        Ok(PermissionSet::new(roles, permissions))
    }

    /// Retire every cached set of an identity by moving it to a new
    /// generation
    pub async fn invalidate(&self, identity_id: IdentityId) -> AuthResult<()> {
        let generation = self
            .cache
            .incr_with_expiry(
                &Self::generation_key(identity_id),
                self.ttl * GENERATION_TTL_FACTOR,
            )
            .await?;
        // A counter that expired and restarted may find an old entry here
        self.cache
            .delete(&Self::key(identity_id, generation))
            .await?;
        Ok(())
    }

    /// Grant a role and evict the cached permissions in the same call
    pub async fn assign_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        let changed = self.store.assign_role(identity_id, role_slug).await?;
        self.invalidate(identity_id).await?;
        log::info!("Assigned role {role_slug} to identity {identity_id}");
        Ok(changed)
    }

    /// Withdraw a role and evict the cached permissions in the same call
    pub async fn remove_role(&self, identity_id: IdentityId, role_slug: &str) -> AuthResult<bool> {
        let changed = self.store.remove_role(identity_id, role_slug).await?;
        self.invalidate(identity_id).await?;
        log::info!("Removed role {role_slug} from identity {identity_id}");
        Ok(changed)
    }
}
