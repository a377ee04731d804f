use serde::{Deserialize, Serialize};

use crate::models::{MediaKind, MessageKind, WireMessage};

// -- JWT claims --

/// Claims carried by the bearer tokens this service verifies. Issuance lives
/// in the identity service; the canonical shape lives here so the middleware
/// and the socket upgrade share one definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub handle: String,
    pub exp: usize,
}

// -- Uniform operation envelope --

/// Success/failure envelope returned by every request/response operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { ok: true, code: None, message: None, data: Some(data) }
    }

    pub fn fail(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code.to_string()),
            message: Some(message.into()),
            data: None,
        }
    }
}

impl Envelope<()> {
    pub fn done() -> Self {
        Self { ok: true, code: None, message: None, data: None }
    }
}

// -- Operation payloads --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRequest {
    pub target_room: String,
    pub target_kind: MessageKind,
    pub receiver_id: i64,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub message_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    pub media: Option<MediaKind>,
    /// Inclusive unix-second bounds on created_at.
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// One entry of the chat-list view: last visible message, unread arithmetic,
/// and per-user room state. Ordered pinned-first, then by counter recency.
#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub room: String,
    pub kind: MessageKind,
    pub title: String,
    pub last_message: Option<WireMessage>,
    pub unread: i64,
    pub unread_mentions: i64,
    pub pinned: bool,
    pub muted: bool,
    pub message_count: i64,
    pub updated_at: i64,
}

/// Query parameters of the socket upgrade. The token is carried in the query
/// string because browsers cannot set headers on WebSocket requests.
#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub kind: MessageKind,
    pub token: String,
}
