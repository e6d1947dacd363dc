#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use murmur_common::id::{prefix, prefixed_ulid};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use murmur_gateway::auth::tokens::{issue_access_token, JwtValidator};
use murmur_gateway::config::Config;
use murmur_gateway::db::memory::MemoryStore;
use murmur_gateway::db::Stores;
use murmur_gateway::gateway::{Hub, HubSettings};
use murmur_gateway::models::channel::Channel;
use murmur_gateway::models::role::Role;
use murmur_gateway::permissions::{
    ADMINISTRATOR, MANAGE_CHANNELS, MANAGE_ROLES, READ_MESSAGES, SEND_MESSAGES, VIEW_CHANNEL,
};
use murmur_gateway::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a test AppState over in-memory stores.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    test_state_with(Config::with_secret(TEST_SECRET))
}

pub fn test_state_with(config: Config) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState {
        stores: Stores::memory(store.clone()),
        tokens: Arc::new(JwtValidator::new(&config.jwt_secret)),
        hub: Hub::start(HubSettings::from(&config)),
        config: Arc::new(config),
    };
    (state, store)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryStore>) {
    let (state, store) = test_state();
    let app = murmur_gateway::routes::router().with_state(state.clone());
    (app, state, store)
}

pub fn token_for(user_id: &str) -> String {
    issue_access_token(TEST_SECRET, user_id).expect("sign test token")
}

pub fn new_user_id() -> String {
    prefixed_ulid(prefix::USER)
}

/// IDs of a seeded server: an owner with an administrator role, a moderator
/// with MANAGE_ROLES and MANAGE_CHANNELS, a plain member, and one channel.
pub struct SeededServer {
    pub server_id: String,
    pub channel_id: String,
    pub everyone_role: String,
    pub admin_role: String,
    pub mod_role: String,
    pub owner_id: String,
    pub moderator_id: String,
    pub member_id: String,
}

pub fn seed_server(store: &MemoryStore) -> SeededServer {
    let server_id = prefixed_ulid(prefix::SERVER);
    let channel_id = prefixed_ulid(prefix::CHANNEL);

    let role = |name: &str, position: i32, permissions: i64, is_default: bool| Role {
        id: prefixed_ulid(prefix::ROLE),
        server_id: server_id.clone(),
        name: name.to_string(),
        position,
        permissions,
        is_default,
    };
    let everyone = role("everyone", 0, VIEW_CHANNEL | READ_MESSAGES | SEND_MESSAGES, true);
    let moderator = role("moderator", 5, MANAGE_ROLES | MANAGE_CHANNELS, false);
    let admin = role("admin", 10, ADMINISTRATOR, false);

    let seeded = SeededServer {
        server_id: server_id.clone(),
        channel_id: channel_id.clone(),
        everyone_role: everyone.id.clone(),
        admin_role: admin.id.clone(),
        mod_role: moderator.id.clone(),
        owner_id: new_user_id(),
        moderator_id: new_user_id(),
        member_id: new_user_id(),
    };

    store.insert_role(everyone);
    store.insert_role(moderator);
    store.insert_role(admin);
    store.insert_channel(Channel {
        id: channel_id,
        server_id: server_id.clone(),
        name: "general".to_string(),
    });
    store.add_member(&server_id, &seeded.owner_id, &[&seeded.admin_role]);
    store.add_member(&server_id, &seeded.moderator_id, &[&seeded.mod_role]);
    store.add_member(&server_id, &seeded.member_id, &[]);

    seeded
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = murmur_gateway::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Connect to `/ws` as `user_id` and return the socket plus the ready payload.
pub async fn connect(addr: SocketAddr, user_id: &str) -> (WsClient, Value) {
    let url = format!("ws://{addr}/ws?token={}", token_for(user_id));
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let ready = next_json(&mut ws).await.expect("ready frame");
    assert_eq!(ready["op"], "ready");
    (ws, ready["d"].clone())
}

/// Next text frame as JSON, or `None` if nothing arrives within a second.
pub async fn next_json(ws: &mut WsClient) -> Option<Value> {
    loop {
        let msg = time::timeout(Duration::from_secs(1), ws.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            tungstenite::Message::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"))
            }
            tungstenite::Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read frames until one with `op` arrives.
pub async fn next_op(ws: &mut WsClient, op: &str) -> Option<Value> {
    while let Some(frame) = next_json(ws).await {
        if frame["op"] == op {
            return Some(frame);
        }
    }
    None
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
