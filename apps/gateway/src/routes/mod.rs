pub mod channel_overrides;
pub mod channels;
pub mod health;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            channels::router().merge(channel_overrides::router()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Channels
        channels::get_permissions,
        // Channel Overrides
        channel_overrides::list_overrides,
        channel_overrides::upsert_override,
        channel_overrides::delete_override,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::channel::Channel,
            crate::models::channel_override::ChannelOverride,
            crate::models::role::Role,
            crate::models::user::UserStatus,
            // Route request/response types
            health::HealthResponse,
            channels::EffectivePermissionsResponse,
            channel_overrides::UpsertOverrideRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Channels", description = "Channel permissions"),
        (name = "Channel Overrides", description = "Per-role channel permission overrides"),
    )
)]
pub struct ApiDoc;
