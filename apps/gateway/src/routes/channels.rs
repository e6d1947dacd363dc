//! Effective channel permissions for the caller.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::access;
use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::permissions;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/channels/{channel_id}/permissions", get(get_permissions))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub channel_id: String,
    pub server_id: String,
    /// Resolved permission bitmask, overrides applied.
    pub permissions: i64,
    pub administrator: bool,
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/permissions
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/channels/{channel_id}/permissions",
    tag = "Channels",
    security(("bearer" = [])),
    params(
        ("channel_id" = String, Path, description = "Channel ID"),
    ),
    responses(
        (status = 200, description = "Caller's effective permissions", body = EffectivePermissionsResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Not a member of the channel's server", body = ApiErrorBody),
        (status = 404, description = "Channel not found", body = ApiErrorBody),
    ),
)]
pub async fn get_permissions(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<EffectivePermissionsResponse>, ApiError> {
    let channel = access::load_channel(&state.stores, &channel_id).await?;

    if !state
        .stores
        .memberships
        .is_member(&channel.server_id, &user_id)
        .await?
    {
        return Err(ApiError::forbidden("You are not a member of this server"));
    }

    let perms = access::channel_permissions(&state.stores, &channel, &user_id).await?;

    Ok(Json(EffectivePermissionsResponse {
        channel_id: channel.id,
        server_id: channel.server_id,
        permissions: perms,
        administrator: perms & permissions::ADMINISTRATOR != 0,
    }))
}
