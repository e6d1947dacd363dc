//! Client signaling the gateway routes to other subsystems.
//!
//! Voice rooms, one-to-one calls, and DM typing are owned by services outside
//! the gateway. The socket loop decodes their requests and hands them to the
//! handlers registered here at startup; whatever those services want to tell
//! clients afterwards goes back out through [`Hub::publish`].
//!
//! [`Hub::publish`]: super::Hub::publish

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A voice-room request from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSignal {
    Join { channel_id: String },
    Leave,
    /// Self mute/deafen/stream toggles. Absent fields are left unchanged.
    UpdateState(VoiceStateChange),
    /// Server mute/deafen of another user.
    ModerateState(VoiceModeration),
    Move {
        target_user_id: String,
        target_channel_id: String,
    },
    Disconnect { target_user_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VoiceStateChange {
    pub is_muted: Option<bool>,
    pub is_deafened: Option<bool>,
    pub is_streaming: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceModeration {
    pub target_user_id: String,
    pub is_server_muted: Option<bool>,
    pub is_server_deafened: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RtcSignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// An SDP offer/answer or ICE candidate, relayed without inspection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RtcSignal {
    pub call_id: String,
    #[serde(rename = "type")]
    pub kind: RtcSignalKind,
    pub sdp: Option<String>,
    pub candidate: Option<Value>,
}

/// A one-to-one call request from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignal {
    Initiate {
        receiver_id: String,
        call_type: CallType,
    },
    Accept { call_id: String },
    Decline { call_id: String },
    End,
    Relay(RtcSignal),
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub type VoiceHandler =
    Arc<dyn Fn(String, VoiceSignal) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;
pub type CallHandler =
    Arc<dyn Fn(String, CallSignal) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;
pub type DmTypingHandler =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

#[derive(Default)]
struct Handlers {
    voice: Vec<VoiceHandler>,
    call: Vec<CallHandler>,
    dm_typing: Vec<DmTypingHandler>,
}

/// Handlers for signaling the gateway does not act on itself. Each handler
/// runs on its own task; failures are logged.
#[derive(Default)]
pub struct SignalRouter {
    handlers: RwLock<Handlers>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the sender's user ID for every voice request.
    pub fn on_voice<F, Fut>(&self, handler: F)
    where
        F: Fn(String, VoiceSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.handlers
            .write()
            .voice
            .push(Arc::new(move |user_id, signal| handler(user_id, signal).boxed()));
    }

    /// Called with the sender's user ID for every call request.
    pub fn on_call<F, Fut>(&self, handler: F)
    where
        F: Fn(String, CallSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.handlers
            .write()
            .call
            .push(Arc::new(move |user_id, signal| handler(user_id, signal).boxed()));
    }

    /// Called with the sender's user ID and the DM channel they are typing in.
    pub fn on_dm_typing<F, Fut>(&self, handler: F)
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.handlers.write().dm_typing.push(Arc::new(move |user_id, dm_channel_id| {
            handler(user_id, dm_channel_id).boxed()
        }));
    }

    /// Hand a voice request to every voice handler. Returns how many ran.
    pub fn voice(&self, user_id: &str, signal: VoiceSignal) -> usize {
        let handlers = self.handlers.read().voice.clone();
        let futs = handlers
            .iter()
            .map(|handler| handler(user_id.to_string(), signal.clone()))
            .collect();
        spawn_all(futs, "voice", user_id)
    }

    pub fn call(&self, user_id: &str, signal: CallSignal) -> usize {
        let handlers = self.handlers.read().call.clone();
        let futs = handlers
            .iter()
            .map(|handler| handler(user_id.to_string(), signal.clone()))
            .collect();
        spawn_all(futs, "call", user_id)
    }

    pub fn dm_typing(&self, user_id: &str, dm_channel_id: &str) -> usize {
        let handlers = self.handlers.read().dm_typing.clone();
        let futs = handlers
            .iter()
            .map(|handler| handler(user_id.to_string(), dm_channel_id.to_string()))
            .collect();
        spawn_all(futs, "dm_typing", user_id)
    }
}

fn spawn_all(
    futs: Vec<BoxFuture<'static, Result<(), ApiError>>>,
    kind: &'static str,
    user_id: &str,
) -> usize {
    if futs.is_empty() {
        tracing::debug!(%user_id, signal = kind, "no handler registered, signal dropped");
        return 0;
    }

    let count = futs.len();
    for fut in futs {
        let user = user_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(user_id = %user, %err, signal = kind, "signal handler failed");
            }
        });
    }
    count
}
