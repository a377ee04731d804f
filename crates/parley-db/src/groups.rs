use anyhow::Result;
use rusqlite::Connection;

use parley_types::models::GroupRole;

use crate::models::{GroupRow, MemberRow};
use crate::{Database, OptionalExt};

impl Database {
    pub fn group_by_room(&self, room: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| query_group_by_room(conn, room))
    }

    pub fn member_role(&self, group_id: i64, user_id: i64) -> Result<Option<GroupRole>> {
        self.with_conn(|conn| {
            let role: Option<String> = conn
                .query_row(
                    "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    [group_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(role.as_deref().and_then(GroupRole::parse))
        })
    }

    pub fn roster(&self, group_id: i64) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, role, alias FROM group_members
                 WHERE group_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        role: row.get(1)?,
                        alias: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Adapter surface for the external membership service --

    pub fn create_group(&self, id: i64, room: &str, title: &str, owner_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (id, room, title, owner_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, room, title, owner_id],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role)
                 VALUES (?1, ?2, 'owner')",
                [id, owner_id],
            )?;
            Ok(())
        })
    }

    pub fn add_group_member(
        &self,
        group_id: i64,
        user_id: i64,
        role: GroupRole,
        alias: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, alias)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![group_id, user_id, role.as_str(), alias],
            )?;
            Ok(())
        })
    }

    pub fn disband_group(&self, group_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE groups SET disbanded = 1 WHERE id = ?1", [group_id])?;
            Ok(())
        })
    }
}

pub(crate) fn query_group_by_room(conn: &Connection, room: &str) -> Result<Option<GroupRow>> {
    conn.query_row(
        "SELECT id, room, title, owner_id, disbanded FROM groups WHERE room = ?1",
        [room],
        |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                room: row.get(1)?,
                title: row.get(2)?,
                owner_id: row.get(3)?,
                disbanded: row.get(4)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_and_roles() {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.create_group(10, "g1", "Climbing", 1).unwrap();
        db.add_group_member(10, 2, GroupRole::Admin, Some("Bobby")).unwrap();

        let group = db.group_by_room("g1").unwrap().unwrap();
        assert_eq!(group.id, 10);
        assert!(!group.disbanded);

        assert_eq!(db.member_role(10, 1).unwrap(), Some(GroupRole::Owner));
        assert_eq!(db.member_role(10, 2).unwrap(), Some(GroupRole::Admin));
        assert_eq!(db.member_role(10, 3).unwrap(), None);
        assert_eq!(db.roster(10).unwrap().len(), 2);

        db.disband_group(10).unwrap();
        assert!(db.group_by_room("g1").unwrap().unwrap().disbanded);
    }
}
