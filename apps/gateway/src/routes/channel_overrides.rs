//! Channel permission override endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::access;
use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::channel_override::ChannelOverride;
use crate::permissions;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels/{channel_id}/overrides", get(list_overrides))
        .route(
            "/channels/{channel_id}/overrides/{role_id}",
            axum::routing::put(upsert_override).delete(delete_override),
        )
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/overrides
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/channels/{channel_id}/overrides",
    tag = "Channel Overrides",
    security(("bearer" = [])),
    params(
        ("channel_id" = String, Path, description = "Channel ID"),
    ),
    responses(
        (status = 200, description = "List of channel overrides", body = [ChannelOverride]),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Channel not found", body = ApiErrorBody),
    ),
)]
pub async fn list_overrides(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<Vec<ChannelOverride>>, ApiError> {
    let channel = access::load_channel(&state.stores, &channel_id).await?;

    access::check_server_permission(
        &state.stores,
        &channel.server_id,
        &user_id,
        permissions::MANAGE_CHANNELS,
    )
    .await?;

    let list = state.stores.overrides.overrides_of(&channel.id).await?;
    Ok(Json(list))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/channels/:channel_id/overrides/:role_id
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OverridePath {
    pub channel_id: String,
    pub role_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertOverrideRequest {
    pub allow: i64,
    pub deny: i64,
}

#[utoipa::path(
    put,
    path = "/api/v1/channels/{channel_id}/overrides/{role_id}",
    tag = "Channel Overrides",
    security(("bearer" = [])),
    params(
        ("channel_id" = String, Path, description = "Channel ID"),
        ("role_id" = String, Path, description = "Role ID"),
    ),
    request_body = UpsertOverrideRequest,
    responses(
        (status = 200, description = "Override upserted", body = ChannelOverride),
        (status = 204, description = "All-zero override; the role inherits again"),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Channel or role not found", body = ApiErrorBody),
    ),
)]
pub async fn upsert_override(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(path): Path<OverridePath>,
    Json(body): Json<UpsertOverrideRequest>,
) -> Result<Response, ApiError> {
    let channel = access::load_channel(&state.stores, &path.channel_id).await?;

    access::check_server_permission(
        &state.stores,
        &channel.server_id,
        &user_id,
        permissions::MANAGE_ROLES,
    )
    .await?;

    let stored = access::set_channel_override(
        &state.stores,
        &state.hub,
        &channel,
        &path.role_id,
        body.allow,
        body.deny,
    )
    .await?;

    Ok(match stored {
        Some(ov) => Json(ov).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/channels/:channel_id/overrides/:role_id
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/channels/{channel_id}/overrides/{role_id}",
    tag = "Channel Overrides",
    security(("bearer" = [])),
    params(
        ("channel_id" = String, Path, description = "Channel ID"),
        ("role_id" = String, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Override deleted"),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Override not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_override(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(path): Path<OverridePath>,
) -> Result<StatusCode, ApiError> {
    let channel = access::load_channel(&state.stores, &path.channel_id).await?;

    access::check_server_permission(
        &state.stores,
        &channel.server_id,
        &user_id,
        permissions::MANAGE_ROLES,
    )
    .await?;

    if access::delete_channel_override(&state.stores, &state.hub, &channel, &path.role_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Override not found"))
    }
}
