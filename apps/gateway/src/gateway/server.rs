//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::access;
use crate::error::ApiError;
use crate::models::user::UserStatus;
use crate::permissions::{SEND_MESSAGES, VIEW_CHANNEL};
use crate::AppState;

use super::broadcast::Scope;
use super::connection::{CloseReason, Connection, Enqueue};
use super::events::{ClientEvent, Event, ReadyData};

/// Close code used when the hub cannot take the connection.
const CLOSE_UNAVAILABLE: u16 = 1011;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Everything loaded before the upgrade is accepted.
struct Handshake {
    user_id: String,
    server_ids: Vec<String>,
    stored_status: Option<UserStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Authenticate before upgrading so a bad token never reaches the registry.
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let user_id = state.tokens.validate(token)?;

    let server_ids = state.stores.memberships.server_ids_of(&user_id).await?;
    let stored_status = state.stores.users.status_of(&user_id).await?;

    let handshake = Handshake {
        user_id,
        server_ids,
        stored_status,
    };
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, handshake)))
}

async fn handle_connection(socket: WebSocket, state: AppState, handshake: Handshake) {
    let (mut ws_tx, ws_rx) = socket.split();
    let hub = state.hub.clone();
    let write_timeout = hub.settings().write_timeout;

    let (conn, outbound) = match hub
        .connect(
            &handshake.user_id,
            handshake.server_ids.iter().cloned(),
            handshake.stored_status,
        )
        .await
    {
        Ok(registered) => registered,
        Err(err) => {
            tracing::error!(%err, user_id = %handshake.user_id, "could not register connection");
            send_close(&mut ws_tx, write_timeout, CLOSE_UNAVAILABLE, "Gateway unavailable").await;
            return;
        }
    };

    // Refused because the gateway is shutting down.
    if let Some(reason) = conn.close_reason() {
        send_close(&mut ws_tx, write_timeout, reason.code(), reason.message()).await;
        return;
    }

    tracing::info!(
        conn_id = %conn.id,
        user_id = %conn.user_id,
        servers = handshake.server_ids.len(),
        "gateway connection established"
    );

    let ready = ReadyData {
        online_user_ids: hub.visible_online_user_ids(),
        server_ids: handshake.server_ids,
        status: hub.presence().status_of(&conn.user_id),
        heartbeat_interval: hub.settings().heartbeat_interval.as_millis() as u64,
    };

    match Event::ready(&ready).encode(None) {
        Ok(frame) => {
            if ws_tx.send(Message::Text(frame)).await.is_ok() {
                run_connection(&state, conn.clone(), ws_tx, ws_rx, outbound).await;
            }
        }
        Err(err) => tracing::error!(?err, "failed to encode ready"),
    }

    if let Err(err) = hub.disconnect(&conn.id).await {
        tracing::warn!(%err, conn_id = %conn.id, "could not unregister connection");
    }

    tracing::info!(
        conn_id = %conn.id,
        user_id = %conn.user_id,
        reason = ?conn.close_reason(),
        "gateway connection ended"
    );
}

/// Main loop: forward queued events, react to client frames, and honor close
/// requests from the hub.
async fn run_connection(
    state: &AppState,
    conn: Arc<Connection>,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
) {
    let write_timeout = state.hub.settings().write_timeout;

    loop {
        tokio::select! {
            biased;

            reason = conn.closed() => {
                send_close(&mut ws_tx, write_timeout, reason.code(), reason.message()).await;
                break;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match time::timeout(write_timeout, ws_tx.send(Message::Text(frame))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(?e, conn_id = %conn.id, "ws write error");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(conn_id = %conn.id, "ws write stalled, closing");
                        conn.close(CloseReason::SlowConsumer);
                    }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientEvent::parse(text.as_str()) {
                            Some(event) => handle_client_event(state, &conn, event).await,
                            None => {
                                tracing::debug!(conn_id = %conn.id, "dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, conn_id = %conn.id, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }
        }
    }
}

async fn handle_client_event(state: &AppState, conn: &Arc<Connection>, event: ClientEvent) {
    match event {
        ClientEvent::Heartbeat => {
            conn.touch(Instant::now());
            match Event::heartbeat_ack().encode(None) {
                Ok(frame) => {
                    if conn.try_enqueue(frame) != Enqueue::Queued {
                        tracing::debug!(conn_id = %conn.id, "heartbeat ack not queued");
                    }
                }
                Err(err) => tracing::error!(?err, "failed to encode heartbeat ack"),
            }
        }
        ClientEvent::PresenceUpdate { status } => {
            if let Err(err) = state.hub.set_manual_status(&conn.user_id, status).await {
                tracing::warn!(%err, user_id = %conn.user_id, "presence update dropped");
            }
        }
        ClientEvent::Typing { channel_id } => {
            if let Err(err) = relay_typing(state, conn, &channel_id).await {
                tracing::debug!(%err, user_id = %conn.user_id, %channel_id, "typing ignored");
            }
        }
        ClientEvent::DmTyping { dm_channel_id } => {
            state.hub.signaling().dm_typing(&conn.user_id, &dm_channel_id);
        }
        ClientEvent::Voice(signal) => {
            state.hub.signaling().voice(&conn.user_id, signal);
        }
        ClientEvent::Call(signal) => {
            state.hub.signaling().call(&conn.user_id, signal);
        }
    }
}

/// Tell everybody else who can see the channel that this user is typing.
async fn relay_typing(
    state: &AppState,
    conn: &Connection,
    channel_id: &str,
) -> Result<(), ApiError> {
    let channel = access::load_channel(&state.stores, channel_id).await?;
    if !conn.is_subscribed(&channel.server_id) {
        return Err(ApiError::forbidden("Not subscribed to this server"));
    }
    access::check_channel_permission(&state.stores, &channel, &conn.user_id, SEND_MESSAGES)
        .await?;

    let audience: Vec<String> =
        access::channel_audience(&state.stores, &state.hub, &channel, VIEW_CHANNEL)
            .await?
            .into_iter()
            .filter(|user_id| user_id != &conn.user_id)
            .collect();
    if !audience.is_empty() {
        state.hub.publish(
            &Scope::Users(audience),
            &Event::typing_start(&conn.user_id, &channel.id),
        );
    }
    Ok(())
}

/// Send a WebSocket close frame with a code and reason. Gives up after
/// `write_timeout`: the peer being closed is often the one not reading.
async fn send_close(ws_tx: &mut WsSink, write_timeout: Duration, code: u16, reason: &str) {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    match time::timeout(write_timeout, ws_tx.send(close_msg)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(?e, code, "ws close write error"),
        Err(_) => tracing::debug!(code, "ws close write stalled, dropping socket"),
    }
}
