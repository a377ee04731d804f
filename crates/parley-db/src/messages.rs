use anyhow::Result;
use rusqlite::{Connection, named_params};

use parley_types::api::SearchQuery;
use parley_types::models::{
    MediaKind, MessageKind, NoticeCode, RECALL_WINDOW_SECS, WireMessage,
};

use crate::models::MessageRow;
use crate::names::resolve_name;
use crate::{Database, OptionalExt};

/// The §-single visibility predicate: tombstones, gating flags and the
/// system-notice rule, expressed once and shared by history replay, search,
/// unread counts and room summaries. Both gating flags are frozen at send
/// time, so a gated row is visible only to its sender.
pub(crate) const VISIBLE_SQL: &str = "
    NOT EXISTS (SELECT 1 FROM tombstones t
                WHERE t.message_id = m.id AND t.user_id = :viewer)
    AND (m.requires_gating = 0 OR m.sender_id = :viewer)
    AND (m.sent_while_blocked = 0 OR m.sender_id = :viewer)
    AND (m.media <> 'system'
         OR m.sender_id = :viewer
         OR m.notice_code = 'verification-required')
";

const MESSAGE_COLS: &str = "m.id, m.room, m.kind, m.media, m.sender_id, m.receiver_id,
     m.payload, m.size, m.created_at, m.delivered, m.recalled, m.mention_all,
     m.requires_gating, m.sent_while_blocked, m.notice_code";

/// A message about to be persisted. Flags are decided by the ingestion
/// pipeline before the row exists and are never recomputed afterwards.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: String,
    pub kind: MessageKind,
    pub media: MediaKind,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub payload: String,
    pub size: i64,
    pub created_at: i64,
    pub mention_all: bool,
    pub requires_gating: bool,
    pub sent_while_blocked: bool,
    pub notice_code: Option<NoticeCode>,
}

impl NewMessage {
    pub fn text(
        room: &str,
        kind: MessageKind,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
        created_at: i64,
    ) -> Self {
        Self {
            room: room.to_string(),
            kind,
            media: MediaKind::Text,
            sender_id,
            receiver_id,
            payload: content.to_string(),
            size: content.len() as i64,
            created_at,
            mention_all: false,
            requires_gating: false,
            sent_while_blocked: false,
            notice_code: None,
        }
    }
}

impl Database {
    /// Persist a message. The store assigns the id, and with it the only
    /// total order messages have.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (room, kind, media, sender_id, receiver_id, payload, size,
                     created_at, mention_all, requires_gating, sent_while_blocked,
                     notice_code)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    msg.room,
                    msg.kind.as_str(),
                    msg.media.as_str(),
                    msg.sender_id,
                    msg.receiver_id,
                    msg.payload,
                    msg.size,
                    msg.created_at,
                    msg.mention_all,
                    msg.requires_gating,
                    msg.sent_while_blocked,
                    msg.notice_code.map(|c| c.as_str()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLS} FROM messages m WHERE m.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_message).optional()
        })
    }

    /// All messages of a room visible to `viewer`, oldest first.
    pub fn history(&self, room: &str, viewer: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 WHERE m.room = :room AND {VISIBLE_SQL}
                 ORDER BY m.created_at, m.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(named_params! { ":room": room, ":viewer": viewer }, map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// History with sender display names resolved for `viewer`, ready for
    /// the wire. One lock acquisition for the whole batch.
    pub fn history_wire(&self, room: &str, viewer: i64) -> Result<Vec<WireMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 WHERE m.room = :room AND {VISIBLE_SQL}
                 ORDER BY m.created_at, m.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(named_params! { ":room": room, ":viewer": viewer }, map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(|r| row_to_wire(conn, viewer, r)).collect()
        })
    }

    /// Keyword/media/date search within one room, under the same visibility
    /// predicate as history replay. Recalled rows are never returned.
    pub fn search(
        &self,
        room: &str,
        viewer: i64,
        query: &SearchQuery,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 WHERE m.room = :room AND m.recalled = 0 AND {VISIBLE_SQL}
                   AND (:keyword IS NULL OR m.payload LIKE '%' || :keyword || '%')
                   AND (:media IS NULL OR m.media = :media)
                   AND (:from_ts IS NULL OR m.created_at >= :from_ts)
                   AND (:to_ts IS NULL OR m.created_at <= :to_ts)
                 ORDER BY m.created_at, m.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    named_params! {
                        ":room": room,
                        ":viewer": viewer,
                        ":keyword": query.keyword,
                        ":media": query.media.map(|mk| mk.as_str()),
                        ":from_ts": query.from,
                        ":to_ts": query.to,
                    },
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn search_wire(
        &self,
        room: &str,
        viewer: i64,
        query: &SearchQuery,
    ) -> Result<Vec<WireMessage>> {
        let rows = self.search(room, viewer, query)?;
        self.with_conn(|conn| {
            rows.into_iter().map(|r| row_to_wire(conn, viewer, r)).collect()
        })
    }

    /// Wire form of a single row, names resolved for `viewer`.
    pub fn to_wire(&self, viewer: i64, row: MessageRow) -> Result<WireMessage> {
        self.with_conn(|conn| row_to_wire(conn, viewer, row))
    }

    /// Evaluate the visibility predicate for a single (message, viewer) pair.
    pub fn message_visible(&self, id: i64, viewer: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT 1 FROM messages m WHERE m.id = :id AND {VISIBLE_SQL}"
            );
            let mut stmt = conn.prepare(&sql)?;
            Ok(stmt
                .query_row(named_params! { ":id": id, ":viewer": viewer }, |_| Ok(()))
                .optional()?
                .is_some())
        })
    }

    /// Flip `recalled`, but only while the row is unrecalled and inside the
    /// window. Returns false if the conditional update matched nothing, so a
    /// racing second recall cannot double-apply.
    pub fn recall_message(&self, id: i64, now: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE messages SET recalled = 1
                 WHERE id = ?1 AND recalled = 0 AND ?2 - created_at <= ?3",
                rusqlite::params![id, now, RECALL_WINDOW_SECS],
            )?;
            Ok(affected > 0)
        })
    }

    pub fn set_delivered(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE messages SET delivered = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Tombstones --

    pub fn add_tombstone(&self, message_id: i64, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tombstones (message_id, user_id) VALUES (?1, ?2)",
                [message_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Hide an entire room from one user. Used by delete-chat on disbanded
    /// groups; other members are unaffected.
    pub fn tombstone_room(&self, room: &str, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO tombstones (message_id, user_id)
                 SELECT id, ?2 FROM messages WHERE room = ?1",
                rusqlite::params![room, user_id],
            )?;
            Ok(n)
        })
    }

    // -- Room aggregate counter --

    pub fn bump_room_counter(&self, room: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO room_counters (room, message_count, updated_at)
                 VALUES (?1, 1, ?2)
                 ON CONFLICT(room) DO UPDATE SET
                     message_count = message_count + 1,
                     updated_at = excluded.updated_at",
                rusqlite::params![room, now],
            )?;
            Ok(())
        })
    }

    pub fn room_counter(&self, room: &str) -> Result<(i64, i64)> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT message_count, updated_at FROM room_counters WHERE room = ?1",
                    [room],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.unwrap_or((0, 0)))
        })
    }

    /// Newest visible message of a room, for the chat-list summary.
    pub fn last_visible_wire(&self, room: &str, viewer: i64) -> Result<Option<WireMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 WHERE m.room = :room AND {VISIBLE_SQL}
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(named_params! { ":room": room, ":viewer": viewer }, map_message)
                .optional()?;
            row.map(|r| row_to_wire(conn, viewer, r)).transpose()
        })
    }
}

pub(crate) fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room: row.get(1)?,
        kind: row.get(2)?,
        media: row.get(3)?,
        sender_id: row.get(4)?,
        receiver_id: row.get(5)?,
        payload: row.get(6)?,
        size: row.get(7)?,
        created_at: row.get(8)?,
        delivered: row.get(9)?,
        recalled: row.get(10)?,
        mention_all: row.get(11)?,
        requires_gating: row.get(12)?,
        sent_while_blocked: row.get(13)?,
        notice_code: row.get(14)?,
    })
}

pub(crate) fn row_to_wire(
    conn: &Connection,
    viewer: i64,
    row: MessageRow,
) -> Result<WireMessage> {
    let sender_name = resolve_name(conn, viewer, row.sender_id, &row.room)?;
    Ok(WireMessage {
        id: row.id,
        kind: MessageKind::parse(&row.kind)
            .ok_or_else(|| anyhow::anyhow!("corrupt kind '{}' on message {}", row.kind, row.id))?,
        media: MediaKind::parse(&row.media)
            .ok_or_else(|| anyhow::anyhow!("corrupt media '{}' on message {}", row.media, row.id))?,
        room: row.room,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        sender_name,
        content: row.payload,
        size: row.size,
        created_at: row.created_at,
        mention_all: row.mention_all,
        recalled: row.recalled,
    })
}
