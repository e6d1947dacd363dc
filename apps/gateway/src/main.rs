use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur_gateway::auth::tokens::JwtValidator;
use murmur_gateway::config::Config;
use murmur_gateway::db::memory::MemoryStore;
use murmur_gateway::db::Stores;
use murmur_gateway::gateway::{Hub, HubSettings};
use murmur_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let stores = match &config.database_url {
        Some(url) => {
            let pool = murmur_gateway::db::pool::build(url, config.db_pool_size)
                .expect("failed to build database pool");
            Stores::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Stores::memory(Arc::new(MemoryStore::new()))
        }
    };

    let hub = Hub::start(HubSettings::from(&config));
    register_presence_persistence(&hub, &stores);
    let liveness = hub.liveness().spawn();

    tracing::info!(
        heartbeat_interval = ?config.heartbeat_interval,
        grace_multiplier = config.heartbeat_grace_multiplier,
        send_queue_capacity = config.send_queue_capacity,
        "gateway configured"
    );

    let shutdown_timeout = config.shutdown_timeout;
    let state = AppState {
        stores,
        tokens: Arc::new(JwtValidator::new(&config.jwt_secret)),
        config: Arc::new(config),
        hub: hub.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(murmur_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "murmur-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub, shutdown_timeout))
        .await
        .expect("server error");

    liveness.abort();
    tracing::info!("murmur-gateway stopped");
}

/// Write presence lifecycle changes through to the user status store.
fn register_presence_persistence(hub: &Hub, stores: &Stores) {
    let users = stores.users.clone();
    hub.presence().on_user_first_connect(move |user_id| {
        let users = users.clone();
        async move { users.mark_last_seen(&user_id, Utc::now()).await }
    });

    let users = stores.users.clone();
    hub.presence().on_user_fully_disconnected(move |user_id| {
        let users = users.clone();
        async move { users.mark_last_seen(&user_id, Utc::now()).await }
    });

    let users = stores.users.clone();
    hub.presence().on_manual_presence_change(move |user_id, status| {
        let users = users.clone();
        async move { users.update_status(&user_id, status).await }
    });
}

/// Resolves on Ctrl-C once every gateway connection has been closed.
async fn shutdown_signal(hub: Arc<Hub>, timeout: std::time::Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
    hub.shutdown(timeout).await;
}
