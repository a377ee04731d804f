use serde::{Deserialize, Serialize};

/// How long after creation a message may still be recalled.
pub const RECALL_WINDOW_SECS: i64 = 120;

/// Literal token that mentions every group member.
pub const MENTION_ALL_TOKEN: &str = "@everyone";

/// What kind of room a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Private,
    Group,
    Assistant,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Payload shape of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Text,
    Image,
    Video,
    File,
    System,
    Forwarded,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::System => "system",
            Self::Forwarded => "forwarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "file" => Some(Self::File),
            "system" => Some(Self::System),
            "forwarded" => Some(Self::Forwarded),
            _ => None,
        }
    }

    /// Binary media goes through the chunked upload sub-protocol.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::File)
    }
}

/// What a `media = system` row documents. Stored alongside the row so the
/// read-path predicate can single out the codes that are visible to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeCode {
    /// The recipient requires contact verification before seeing messages.
    /// Visible to every viewer of the room, not just the notice's sender.
    VerificationRequired,
    /// The message was rejected because the recipient blocked the sender.
    Rejected,
    /// A message in the room was recalled by the named operator.
    Recalled,
}

impl NoticeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerificationRequired => "verification-required",
            Self::Rejected => "rejected",
            Self::Recalled => "recalled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verification-required" => Some(Self::VerificationRequired),
            "rejected" => Some(Self::Rejected),
            "recalled" => Some(Self::Recalled),
            _ => None,
        }
    }
}

/// Relationship between two users, as seen from the sender's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Both sides have added each other.
    Mutual,
    /// The sender added the receiver but not the other way round.
    OneWay,
    /// The receiver has blocked the sender.
    Blocked,
}

/// Role of a user inside a group room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// A message as it crosses the wire: the stored row plus the sender's
/// display name resolved at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    pub room: String,
    pub kind: MessageKind,
    pub media: MediaKind,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub sender_name: String,
    pub content: String,
    pub size: i64,
    pub created_at: i64,
    pub mention_all: bool,
    pub recalled: bool,
}

/// Payload of a multi-message forward: a snapshot of the source messages
/// taken at forward time, in original chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardBundle {
    pub origin_title: String,
    pub origin_kind: MessageKind,
    pub items: Vec<ForwardItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardItem {
    pub sender_name: String,
    pub content: String,
    pub media: MediaKind,
    pub size: i64,
    pub created_at: i64,
}
