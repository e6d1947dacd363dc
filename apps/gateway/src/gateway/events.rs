//! Wire envelope, op names, and event payloads.
//!
//! Every frame on the socket is `{"op": <string>, "d": <payload>, "seq": <int>}`.
//! `d` is omitted for payload-less ops; `seq` is present only on fanned-out
//! events.

use axum::extract::ws::Utf8Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::channel_override::ChannelOverride;
use crate::models::user::UserStatus;

use super::signaling::{
    CallSignal, CallType, RtcSignal, VoiceModeration, VoiceSignal, VoiceStateChange,
};

// ---------------------------------------------------------------------------
// Op names
// ---------------------------------------------------------------------------

pub struct Op;

impl Op {
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const HEARTBEAT_ACK: &'static str = "heartbeat_ack";
    pub const READY: &'static str = "ready";
    pub const PRESENCE_UPDATE: &'static str = "presence_update";
    pub const TYPING: &'static str = "typing";
    pub const TYPING_START: &'static str = "typing_start";
    pub const CHANNEL_PERMISSION_UPDATE: &'static str = "channel_permission_update";
    pub const CHANNEL_PERMISSION_DELETE: &'static str = "channel_permission_delete";

    pub const DM_TYPING: &'static str = "dm_typing";

    pub const VOICE_JOIN: &'static str = "voice_join";
    pub const VOICE_LEAVE: &'static str = "voice_leave";
    pub const VOICE_STATE_UPDATE_REQUEST: &'static str = "voice_state_update_request";
    pub const VOICE_ADMIN_STATE_UPDATE: &'static str = "voice_admin_state_update";
    pub const VOICE_MOVE_USER: &'static str = "voice_move_user";
    pub const VOICE_DISCONNECT_USER: &'static str = "voice_disconnect_user";

    pub const P2P_CALL_INITIATE: &'static str = "p2p_call_initiate";
    pub const P2P_CALL_ACCEPT: &'static str = "p2p_call_accept";
    pub const P2P_CALL_DECLINE: &'static str = "p2p_call_decline";
    pub const P2P_CALL_END: &'static str = "p2p_call_end";
    pub const P2P_SIGNAL: &'static str = "p2p_signal";
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// An outbound event. The hub stamps `seq` when it is fanned out.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub op: String,
    pub data: Value,
}

#[derive(Serialize)]
struct Envelope<'a> {
    op: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    d: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

impl Event {
    pub fn new(op: impl Into<String>, data: Value) -> Self {
        Self {
            op: op.into(),
            data,
        }
    }

    /// Build an event from any serializable payload.
    pub fn dispatch<T: Serialize>(op: &str, payload: &T) -> Self {
        Self::new(op, serde_json::json!(payload))
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(Op::HEARTBEAT_ACK, Value::Null)
    }

    pub fn ready(data: &ReadyData) -> Self {
        Self::dispatch(Op::READY, data)
    }

    pub fn presence(user_id: &str, status: UserStatus) -> Self {
        Self::dispatch(
            Op::PRESENCE_UPDATE,
            &PresenceData {
                user_id: user_id.to_string(),
                status,
            },
        )
    }

    pub fn typing_start(user_id: &str, channel_id: &str) -> Self {
        Self::dispatch(
            Op::TYPING_START,
            &TypingData {
                user_id: user_id.to_string(),
                channel_id: channel_id.to_string(),
            },
        )
    }

    pub fn override_updated(ov: &ChannelOverride) -> Self {
        Self::dispatch(Op::CHANNEL_PERMISSION_UPDATE, ov)
    }

    pub fn override_deleted(channel_id: &str, role_id: &str) -> Self {
        Self::dispatch(
            Op::CHANNEL_PERMISSION_DELETE,
            &OverrideDeletedData {
                channel_id: channel_id.to_string(),
                role_id: role_id.to_string(),
            },
        )
    }

    /// Serialize into a text frame.
    pub fn encode(&self, seq: Option<u64>) -> Result<Utf8Bytes, serde_json::Error> {
        let json = serde_json::to_string(&Envelope {
            op: &self.op,
            d: &self.data,
            seq,
        })?;
        Ok(Utf8Bytes::from(json))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyData {
    /// Users currently online and not invisible.
    pub online_user_ids: Vec<String>,
    /// Servers this connection receives server-scoped events for.
    pub server_ids: Vec<String>,
    /// The user's own status, including `invisible`.
    pub status: UserStatus,
    /// Expected heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceData {
    pub user_id: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingData {
    pub user_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideDeletedData {
    pub channel_id: String,
    pub role_id: String,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    op: String,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
struct PresenceUpdatePayload {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TypingPayload {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct DmTypingPayload {
    dm_channel_id: String,
}

#[derive(Debug, Deserialize)]
struct VoiceJoinPayload {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct VoiceMovePayload {
    target_user_id: String,
    target_channel_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetUserPayload {
    target_user_id: String,
}

#[derive(Debug, Deserialize)]
struct CallInitiatePayload {
    receiver_id: String,
    call_type: CallType,
}

#[derive(Debug, Deserialize)]
struct CallIdPayload {
    call_id: String,
}

/// Everything a client may send, decoded once at the socket boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Heartbeat,
    PresenceUpdate { status: UserStatus },
    Typing { channel_id: String },
    DmTyping { dm_channel_id: String },
    Voice(VoiceSignal),
    Call(CallSignal),
}

impl ClientEvent {
    /// Decode a text frame. Returns `None` for anything malformed or unknown;
    /// such frames are dropped without closing the connection.
    pub fn parse(text: &str) -> Option<Self> {
        let envelope: InboundEnvelope = serde_json::from_str(text).ok()?;

        match envelope.op.as_str() {
            Op::HEARTBEAT => Some(Self::Heartbeat),
            Op::PRESENCE_UPDATE => {
                let payload: PresenceUpdatePayload = serde_json::from_value(envelope.d).ok()?;
                let status = UserStatus::manual(&payload.status)?;
                Some(Self::PresenceUpdate { status })
            }
            Op::TYPING => {
                let payload: TypingPayload = serde_json::from_value(envelope.d).ok()?;
                Some(Self::Typing {
                    channel_id: payload.channel_id,
                })
            }
            Op::DM_TYPING => {
                let payload: DmTypingPayload = decode(envelope.d)?;
                Some(Self::DmTyping {
                    dm_channel_id: required(payload.dm_channel_id)?,
                })
            }
            Op::VOICE_JOIN => {
                let payload: VoiceJoinPayload = decode(envelope.d)?;
                Some(Self::Voice(VoiceSignal::Join {
                    channel_id: required(payload.channel_id)?,
                }))
            }
            Op::VOICE_LEAVE => Some(Self::Voice(VoiceSignal::Leave)),
            Op::VOICE_STATE_UPDATE_REQUEST => {
                let change: VoiceStateChange = decode(envelope.d)?;
                Some(Self::Voice(VoiceSignal::UpdateState(change)))
            }
            Op::VOICE_ADMIN_STATE_UPDATE => {
                let mut moderation: VoiceModeration = decode(envelope.d)?;
                moderation.target_user_id = required(moderation.target_user_id)?;
                Some(Self::Voice(VoiceSignal::ModerateState(moderation)))
            }
            Op::VOICE_MOVE_USER => {
                let payload: VoiceMovePayload = decode(envelope.d)?;
                Some(Self::Voice(VoiceSignal::Move {
                    target_user_id: required(payload.target_user_id)?,
                    target_channel_id: required(payload.target_channel_id)?,
                }))
            }
            Op::VOICE_DISCONNECT_USER => {
                let payload: TargetUserPayload = decode(envelope.d)?;
                Some(Self::Voice(VoiceSignal::Disconnect {
                    target_user_id: required(payload.target_user_id)?,
                }))
            }
            Op::P2P_CALL_INITIATE => {
                let payload: CallInitiatePayload = decode(envelope.d)?;
                Some(Self::Call(CallSignal::Initiate {
                    receiver_id: required(payload.receiver_id)?,
                    call_type: payload.call_type,
                }))
            }
            Op::P2P_CALL_ACCEPT => {
                let payload: CallIdPayload = decode(envelope.d)?;
                Some(Self::Call(CallSignal::Accept {
                    call_id: required(payload.call_id)?,
                }))
            }
            Op::P2P_CALL_DECLINE => {
                let payload: CallIdPayload = decode(envelope.d)?;
                Some(Self::Call(CallSignal::Decline {
                    call_id: required(payload.call_id)?,
                }))
            }
            Op::P2P_CALL_END => Some(Self::Call(CallSignal::End)),
            Op::P2P_SIGNAL => {
                let mut signal: RtcSignal = decode(envelope.d)?;
                signal.call_id = required(signal.call_id)?;
                Some(Self::Call(CallSignal::Relay(signal)))
            }
            _ => None,
        }
    }
}

/// A missing `d` decodes like an empty object, so all-optional payloads may
/// be omitted.
fn decode<T: DeserializeOwned>(d: Value) -> Option<T> {
    let d = if d.is_null() {
        Value::Object(Default::default())
    } else {
        d
    };
    serde_json::from_value(d).ok()
}

fn required(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
