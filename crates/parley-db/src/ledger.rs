use anyhow::Result;
use rusqlite::named_params;

use crate::messages::VISIBLE_SQL;
use crate::Database;

impl Database {
    // -- Read markers (group chats) --

    /// Idempotent read marker. Returns true if a new marker was inserted.
    pub fn mark_read(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO read_markers (message_id, user_id) VALUES (?1, ?2)",
                [message_id, user_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Ids of visible room messages the user has not marked read yet,
    /// oldest first. The caller marks them one by one so a failing row can
    /// be skipped without aborting the batch.
    pub fn unmarked_visible_messages(&self, room: &str, viewer: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.id FROM messages m
                 WHERE m.room = :room AND {VISIBLE_SQL}
                   AND NOT EXISTS (SELECT 1 FROM read_markers r
                                   WHERE r.message_id = m.id AND r.user_id = :viewer)
                 ORDER BY m.created_at, m.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(named_params! { ":room": room, ":viewer": viewer }, |row| {
                    row.get(0)
                })?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Unread count for a group room: visible, not self-authored, unmarked.
    pub fn group_unread_count(&self, room: &str, viewer: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.room = :room AND m.sender_id <> :viewer AND {VISIBLE_SQL}
                   AND NOT EXISTS (SELECT 1 FROM read_markers r
                                   WHERE r.message_id = m.id AND r.user_id = :viewer)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let n = stmt
                .query_row(named_params! { ":room": room, ":viewer": viewer }, |row| {
                    row.get(0)
                })?;
            Ok(n)
        })
    }

    // -- Delivered flag (private chats) --

    /// Flip `delivered` on every visible undelivered message addressed to
    /// the viewer. The two-party substitute for the group ledger.
    pub fn mark_private_delivered(&self, room: &str, viewer: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE messages SET delivered = 1
                 WHERE id IN (SELECT m.id FROM messages m
                              WHERE m.room = :room AND m.receiver_id = :viewer
                                AND m.delivered = 0 AND {VISIBLE_SQL})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let n = stmt.execute(named_params! { ":room": room, ":viewer": viewer })?;
            Ok(n)
        })
    }

    /// Unread count for a private room: visible, addressed to the viewer,
    /// not yet delivered.
    pub fn private_unread_count(&self, room: &str, viewer: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.room = :room AND m.receiver_id = :viewer
                   AND m.delivered = 0 AND {VISIBLE_SQL}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let n = stmt
                .query_row(named_params! { ":room": room, ":viewer": viewer }, |row| {
                    row.get(0)
                })?;
            Ok(n)
        })
    }

    // -- Mentions --

    pub fn insert_mentions(&self, message_id: i64, user_ids: &[i64]) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO mentions (message_id, user_id) VALUES (?1, ?2)",
            )?;
            for uid in user_ids {
                stmt.execute([message_id, *uid])?;
            }
            Ok(())
        })
    }

    pub fn mentioned_users(&self, message_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user_id FROM mentions WHERE message_id = ?1 ORDER BY user_id")?;
            let ids = stmt
                .query_map([message_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Acknowledge a mention call-out. Independent of the general read
    /// marker; idempotent.
    pub fn mark_mention_read(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO mention_reads (message_id, user_id)
                 SELECT ?1, ?2 WHERE EXISTS
                     (SELECT 1 FROM mentions
                      WHERE message_id = ?1 AND user_id = ?2)",
                [message_id, user_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Unacknowledged mention call-outs for the viewer in a room.
    pub fn unread_mention_count(&self, room: &str, viewer: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM mentions mn
                 JOIN messages m ON m.id = mn.message_id
                 WHERE m.room = :room AND mn.user_id = :viewer AND {VISIBLE_SQL}
                   AND m.recalled = 0
                   AND NOT EXISTS (SELECT 1 FROM mention_reads mr
                                   WHERE mr.message_id = mn.message_id
                                     AND mr.user_id = :viewer)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let n = stmt
                .query_row(named_params! { ":room": room, ":viewer": viewer }, |row| {
                    row.get(0)
                })?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewMessage;
    use parley_types::models::MessageKind;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.add_user(3, "carol", "Carol").unwrap();
        db
    }

    #[test]
    fn read_markers_are_idempotent() {
        let db = db();
        let id = db
            .insert_message(&NewMessage::text("g1", MessageKind::Group, 1, 9, "hi", 100))
            .unwrap();
        assert!(db.mark_read(id, 2).unwrap());
        assert!(!db.mark_read(id, 2).unwrap());
        assert_eq!(db.group_unread_count("g1", 2).unwrap(), 0);
    }

    #[test]
    fn unread_count_excludes_self_and_read() {
        let db = db();
        let own = db
            .insert_message(&NewMessage::text("g1", MessageKind::Group, 2, 9, "mine", 100))
            .unwrap();
        let other = db
            .insert_message(&NewMessage::text("g1", MessageKind::Group, 1, 9, "a", 101))
            .unwrap();
        db.insert_message(&NewMessage::text("g1", MessageKind::Group, 3, 9, "b", 102))
            .unwrap();

        // Self-authored rows never count, read rows stop counting.
        assert_eq!(db.group_unread_count("g1", 2).unwrap(), 2);
        db.mark_read(other, 2).unwrap();
        assert_eq!(db.group_unread_count("g1", 2).unwrap(), 1);
        let _ = own;

        // A tombstoned row also stops counting.
        let ids = db.unmarked_visible_messages("g1", 2).unwrap();
        assert_eq!(ids.len(), 1);
        db.add_tombstone(ids[0], 2).unwrap();
        assert_eq!(db.group_unread_count("g1", 2).unwrap(), 0);
    }

    #[test]
    fn private_unread_uses_delivered_flag() {
        let db = db();
        db.insert_message(&NewMessage::text("p1", MessageKind::Private, 1, 2, "a", 100))
            .unwrap();
        db.insert_message(&NewMessage::text("p1", MessageKind::Private, 1, 2, "b", 101))
            .unwrap();

        assert_eq!(db.private_unread_count("p1", 2).unwrap(), 2);
        assert_eq!(db.mark_private_delivered("p1", 2).unwrap(), 2);
        assert_eq!(db.private_unread_count("p1", 2).unwrap(), 0);
        // Re-running is a no-op.
        assert_eq!(db.mark_private_delivered("p1", 2).unwrap(), 0);
    }

    #[test]
    fn mention_ack_is_separate_from_read_marker() {
        let db = db();
        let id = db
            .insert_message(&NewMessage::text("g1", MessageKind::Group, 1, 9, "@carol hi", 100))
            .unwrap();
        db.insert_mentions(id, &[3]).unwrap();

        db.mark_read(id, 3).unwrap();
        // Reading the message does not clear the call-out.
        assert_eq!(db.unread_mention_count("g1", 3).unwrap(), 1);

        assert!(db.mark_mention_read(id, 3).unwrap());
        assert!(!db.mark_mention_read(id, 3).unwrap());
        assert_eq!(db.unread_mention_count("g1", 3).unwrap(), 0);

        // Acknowledging a mention that was never recorded is a no-op.
        assert!(!db.mark_mention_read(id, 2).unwrap());
    }
}
