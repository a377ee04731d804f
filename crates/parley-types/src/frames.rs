use serde::{Deserialize, Serialize};

use crate::models::{MediaKind, WireMessage};

/// Frames sent FROM client TO server over the room socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// A plain text message for the room.
    Text { content: String, receiver_id: i64 },

    /// A client-authored system line. Persisted with system media, so the
    /// read rules keep it scoped to its sender.
    System { content: String, receiver_id: i64 },

    /// Begin a chunked binary upload (image/video/file). The transfer is
    /// complete implicitly once `size` bytes have arrived.
    UploadStart {
        filename: String,
        media: MediaKind,
        size: u64,
        receiver_id: i64,
    },

    /// One chunk of the in-flight upload, base64-encoded.
    UploadChunk { data: String },
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Full room history, pushed once on connect, oldest first.
    History { messages: Vec<WireMessage> },

    /// A single new message (including sender-only system notices).
    Message(WireMessage),

    /// A message in the room was recalled.
    Recall {
        message_id: i64,
        room: String,
        sender_id: i64,
        operator_id: i64,
        sender_name: String,
        operator_name: String,
    },

    /// An inbound frame failed; reported to the offending sender only.
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        // Frames only contain types that serialize infallibly.
        serde_json::to_string(self).unwrap_or_default()
    }
}
