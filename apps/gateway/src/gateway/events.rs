//! Gateway opcodes, event types, and wire-format messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::call::CallKind;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

/// An event queued for delivery to one or more connections.
///
/// Shared between recipients of a fan-out; each connection stamps its own
/// sequence number when writing it to the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub name: &'static str,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(name: &'static str, data: Value) -> Arc<Self> {
        Arc::new(Self { name, data })
    }
}

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const MESSAGE_SENT: &'static str = "message_sent";
    pub const MESSAGE_READ: &'static str = "message_read";
    pub const USER_TYPING: &'static str = "user_typing";
    pub const VIEWER_COUNT_CHANGED: &'static str = "viewer_count_changed";
    pub const STREAM_CHAT_MESSAGE: &'static str = "stream_chat_message";
    pub const STREAM_REACTION: &'static str = "stream_reaction";
    pub const CALL_INITIATED: &'static str = "call_initiated";
    pub const INCOMING_CALL: &'static str = "incoming_call";
    pub const CALL_ACCEPTED: &'static str = "call_accepted";
    pub const CALL_REJECTED: &'static str = "call_rejected";
    pub const CALL_ENDED: &'static str = "call_ended";
    pub const OFFER: &'static str = "offer";
    pub const ANSWER: &'static str = "answer";
    pub const ICE_CANDIDATE: &'static str = "ice_candidate";
    pub const NEW_NOTIFICATION: &'static str = "new_notification";
    pub const USER_STATUS_CHANGED: &'static str = "user_status_changed";
    pub const RATE_LIMIT_EXCEEDED: &'static str = "rate_limit_exceeded";
    pub const ERROR: &'static str = "error";
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Inbound dispatch events
// ---------------------------------------------------------------------------

/// Every event a client may dispatch (op=0), keyed by its `t` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum InboundEvent {
    SendMessage(SendMessagePayload),
    MessageRead(MessageReadPayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    JoinConversation(ConversationPayload),
    LeaveConversation(ConversationPayload),
    JoinStreamRoom(StreamPayload),
    LeaveStreamRoom(StreamPayload),
    StreamChatMessage(StreamChatPayload),
    StreamReaction(StreamReactionPayload),
    CallUser(CallUserPayload),
    CallAccepted(CallPayload),
    CallRejected(CallPayload),
    CallEnded(CallPayload),
    IceCandidate(SignalPayload),
    Offer(SignalPayload),
    Answer(SignalPayload),
    UserStatusUpdate(StatusUpdatePayload),
}

impl InboundEvent {
    /// Parse the `t`/`d` pair of an op=0 client message.
    pub fn parse(kind: &str, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "t": kind, "d": data }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send_message",
            Self::MessageRead(_) => "message_read",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::JoinConversation(_) => "join_conversation",
            Self::LeaveConversation(_) => "leave_conversation",
            Self::JoinStreamRoom(_) => "join_stream_room",
            Self::LeaveStreamRoom(_) => "leave_stream_room",
            Self::StreamChatMessage(_) => "stream_chat_message",
            Self::StreamReaction(_) => "stream_reaction",
            Self::CallUser(_) => "call_user",
            Self::CallAccepted(_) => "call_accepted",
            Self::CallRejected(_) => "call_rejected",
            Self::CallEnded(_) => "call_ended",
            Self::IceCandidate(_) => "ice_candidate",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::UserStatusUpdate(_) => "user_status_update",
        }
    }

    /// Chat-class events that count against the connection's rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::SendMessage(_)
                | Self::TypingStart(_)
                | Self::StreamChatMessage(_)
                | Self::StreamReaction(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessagePayload {
    pub recipient_id: String,
    pub content: String,
    #[serde(default, with = "crate::models::snowflake_id::option")]
    pub reply_to: Option<i64>,
    /// Client correlation token echoed back in `message_sent`.
    #[serde(default)]
    pub client_ref: Option<String>,
}

/// Either a single message or a whole conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageReadPayload {
    #[serde(default, with = "crate::models::snowflake_id::option")]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypingPayload {
    pub recipient_id: String,
}

/// Names the other participant of a direct conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamPayload {
    pub stream_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChatKind {
    /// Ephemeral; broadcast only.
    #[default]
    Chat,
    /// Persisted before broadcast.
    Comment,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamChatPayload {
    pub stream_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: StreamChatKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamReactionPayload {
    pub stream_id: String,
    pub reaction: String,
    /// Short-lived client-assigned ID used by viewers to de-duplicate.
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallUserPayload {
    pub callee_id: String,
    #[serde(default)]
    pub kind: CallKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallPayload {
    pub call_id: String,
}

/// Offer, answer or ICE candidate, relayed without inspection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalPayload {
    pub call_id: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdatePayload {
    pub status: UserStatus,
}
