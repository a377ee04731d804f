/// Database row types — these map directly to SQLite rows.
/// Distinct from the parley-types wire models to keep the store layer
/// independent of presentation.

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub room: String,
    pub kind: String,
    pub media: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub payload: String,
    pub size: i64,
    pub created_at: i64,
    pub delivered: bool,
    pub recalled: bool,
    pub mention_all: bool,
    pub requires_gating: bool,
    pub sent_while_blocked: bool,
    pub notice_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub handle: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub room: String,
    pub title: String,
    pub owner_id: i64,
    pub disbanded: bool,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub user_id: i64,
    pub role: String,
    pub alias: Option<String>,
}
