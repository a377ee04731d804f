use anyhow::Result;
use rusqlite::named_params;

use crate::{Database, OptionalExt};

/// Per-user chat-list state: pin/mute toggles and the set of rooms a user
/// participates in. Toggles are insert-if-absent so retries are safe.
impl Database {
    pub fn pin_room(&self, user_id: i64, room: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO room_pins (user_id, room) VALUES (?1, ?2)",
                rusqlite::params![user_id, room],
            )?;
            Ok(())
        })
    }

    pub fn unpin_room(&self, user_id: i64, room: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM room_pins WHERE user_id = ?1 AND room = ?2",
                rusqlite::params![user_id, room],
            )?;
            Ok(())
        })
    }

    pub fn mute_room(&self, user_id: i64, room: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO room_mutes (user_id, room) VALUES (?1, ?2)",
                rusqlite::params![user_id, room],
            )?;
            Ok(())
        })
    }

    pub fn unmute_room(&self, user_id: i64, room: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM room_mutes WHERE user_id = ?1 AND room = ?2",
                rusqlite::params![user_id, room],
            )?;
            Ok(())
        })
    }

    /// (pinned, muted) for one (user, room).
    pub fn room_flags(&self, user_id: i64, room: &str) -> Result<(bool, bool)> {
        self.with_conn(|conn| {
            let pinned = conn
                .query_row(
                    "SELECT 1 FROM room_pins WHERE user_id = ?1 AND room = ?2",
                    rusqlite::params![user_id, room],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            let muted = conn
                .query_row(
                    "SELECT 1 FROM room_mutes WHERE user_id = ?1 AND room = ?2",
                    rusqlite::params![user_id, room],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok((pinned, muted))
        })
    }

    /// Every room the user participates in: two-party rooms they have sent
    /// or received in, plus all groups they are a member of.
    pub fn rooms_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT room FROM messages
                 WHERE kind IN ('private', 'assistant')
                   AND (sender_id = :user OR receiver_id = :user)
                 UNION
                 SELECT g.room FROM groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = :user
                 ORDER BY room",
            )?;
            let rooms = stmt
                .query_map(named_params! { ":user": user_id }, |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rooms)
        })
    }

    /// Room kind as recorded on its messages; groups are authoritative via
    /// the groups table even before the first message.
    pub fn room_kind(&self, room: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            if crate::groups::query_group_by_room(conn, room)?.is_some() {
                return Ok(Some("group".to_string()));
            }
            let kind: Option<String> = conn
                .query_row(
                    "SELECT kind FROM messages WHERE room = ?1 LIMIT 1",
                    [room],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(kind)
        })
    }

    /// The other participant of a two-party room, from the viewer's side.
    pub fn other_participant(&self, room: &str, viewer: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let pair: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT sender_id, receiver_id FROM messages WHERE room = ?1 LIMIT 1",
                    [room],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(pair.map(|(s, r)| if s == viewer { r } else { s }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewMessage;
    use parley_types::models::{GroupRole, MessageKind};

    #[test]
    fn toggles_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.pin_room(1, "r1").unwrap();
        db.pin_room(1, "r1").unwrap();
        db.mute_room(1, "r1").unwrap();
        assert_eq!(db.room_flags(1, "r1").unwrap(), (true, true));

        db.unpin_room(1, "r1").unwrap();
        db.unmute_room(1, "r1").unwrap();
        db.unmute_room(1, "r1").unwrap();
        assert_eq!(db.room_flags(1, "r1").unwrap(), (false, false));
    }

    #[test]
    fn rooms_for_user_spans_private_and_groups() {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.create_group(10, "g1", "Climbing", 2).unwrap();
        db.add_group_member(10, 1, GroupRole::Member, None).unwrap();
        db.insert_message(&NewMessage::text("p12", MessageKind::Private, 2, 1, "hi", 100))
            .unwrap();

        assert_eq!(db.rooms_for_user(1).unwrap(), vec!["g1", "p12"]);
        assert_eq!(db.room_kind("g1").unwrap().as_deref(), Some("group"));
        assert_eq!(db.room_kind("p12").unwrap().as_deref(), Some("private"));
        assert_eq!(db.other_participant("p12", 1).unwrap(), Some(2));
    }
}
