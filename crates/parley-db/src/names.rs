use anyhow::Result;
use rusqlite::Connection;

use crate::groups::query_group_by_room;
use crate::relations::query_contact_alias;
use crate::{Database, OptionalExt};

/// Fixed display-name precedence used by every replay, mention and notice
/// path: group alias > relationship alias > profile name > handle.
pub(crate) fn resolve_name(
    conn: &Connection,
    viewer: i64,
    subject: i64,
    room: &str,
) -> Result<String> {
    if let Some(group) = query_group_by_room(conn, room)? {
        let alias: Option<Option<String>> = conn
            .query_row(
                "SELECT alias FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [group.id, subject],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(Some(alias)) = alias {
            if !alias.is_empty() {
                return Ok(alias);
            }
        }
    }

    if let Some(alias) = query_contact_alias(conn, viewer, subject)? {
        if !alias.is_empty() {
            return Ok(alias);
        }
    }

    let profile: Option<(String, String)> = conn
        .query_row(
            "SELECT display_name, handle FROM users WHERE id = ?1",
            [subject],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match profile {
        Some((display_name, _)) if !display_name.is_empty() => Ok(display_name),
        Some((_, handle)) => Ok(handle),
        None => Ok(format!("user-{subject}")),
    }
}

impl Database {
    pub fn resolve_display_name(&self, viewer: i64, subject: i64, room: &str) -> Result<String> {
        self.with_conn(|conn| resolve_name(conn, viewer, subject, room))
    }

    /// Roster names a group text can @-mention, as seen by the sender,
    /// excluding the sender themself.
    pub fn mention_candidates(&self, room: &str, sender: i64) -> Result<Vec<(i64, String)>> {
        self.with_conn(|conn| {
            let Some(group) = query_group_by_room(conn, room)? else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(
                "SELECT user_id FROM group_members
                 WHERE group_id = ?1 AND user_id <> ?2 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([group.id, sender], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;

            ids.into_iter()
                .map(|uid| Ok((uid, resolve_name(conn, sender, uid, room)?)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::GroupRole;

    #[test]
    fn precedence_group_alias_contact_alias_profile_handle() {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "").unwrap(); // no profile name
        db.create_group(10, "g1", "Climbing", 1).unwrap();
        db.add_group_member(10, 2, GroupRole::Member, Some("Belayer")).unwrap();

        // Group alias wins inside the group room.
        assert_eq!(db.resolve_display_name(1, 2, "g1").unwrap(), "Belayer");

        // Outside the group: contact alias beats profile.
        db.add_contact(1, 2, Some("Bobby")).unwrap();
        assert_eq!(db.resolve_display_name(1, 2, "p12").unwrap(), "Bobby");

        // No aliases: profile name, then handle.
        assert_eq!(db.resolve_display_name(2, 1, "p12").unwrap(), "Alice");
        assert_eq!(db.resolve_display_name(1, 2, "other").unwrap(), "Bobby");
        db.with_conn(|conn| {
            conn.execute("DELETE FROM contacts", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.resolve_display_name(1, 2, "other").unwrap(), "bob");

        // Unknown subject falls back to a synthetic tag.
        assert_eq!(db.resolve_display_name(1, 99, "other").unwrap(), "user-99");
    }

    #[test]
    fn mention_candidates_exclude_sender() {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.add_user(3, "carol", "Carol").unwrap();
        db.create_group(10, "g1", "Climbing", 1).unwrap();
        db.add_group_member(10, 2, GroupRole::Member, None).unwrap();
        db.add_group_member(10, 3, GroupRole::Member, None).unwrap();

        let candidates = db.mention_candidates("g1", 2).unwrap();
        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
