//! Role administration. Callers need the `roles.manage` permission.

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use hr_auth::{CurrentIdentity, auth::IdentityId};
use serde::{Deserialize, Serialize};

use super::{AppState, error::ApiError};
use crate::logging::log_security_event;

#[derive(Debug, Deserialize)]
pub struct RolePayload {
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct RoleChangeResponse {
    pub identity_id: IdentityId,
    pub role: String,
    /// False when the identity already had (or lacked) the role
    pub changed: bool,
}

/// `POST /api/v1/admin/identities/{id}/roles`
///
/// # Errors
///
/// - `404 Not Found`: Unknown role slug
pub async fn assign_role(
    State(state): State<AppState>,
    Extension(actor): Extension<CurrentIdentity>,
    Path(identity_id): Path<IdentityId>,
    Json(payload): Json<RolePayload>,
) -> Result<Json<RoleChangeResponse>, ApiError> {
    let changed = state.auth.assign_role(identity_id, &payload.role).await?;
    if changed {
        log_security_event(
            "role_assigned",
            Some(identity_id),
            None,
            &format!("Role {} assigned by {}", payload.role, actor.id),
        );
    }
    Ok(Json(RoleChangeResponse {
        identity_id,
        role: payload.role,
        changed,
    }))
}

/// `DELETE /api/v1/admin/identities/{id}/roles`
pub async fn remove_role(
    State(state): State<AppState>,
    Extension(actor): Extension<CurrentIdentity>,
    Path(identity_id): Path<IdentityId>,
    Json(payload): Json<RolePayload>,
) -> Result<Json<RoleChangeResponse>, ApiError> {
    let changed = state.auth.remove_role(identity_id, &payload.role).await?;
    if changed {
        log_security_event(
            "role_removed",
            Some(identity_id),
            None,
            &format!("Role {} removed by {}", payload.role, actor.id),
        );
    }
    Ok(Json(RoleChangeResponse {
        identity_id,
        role: payload.role,
        changed,
    }))
}
