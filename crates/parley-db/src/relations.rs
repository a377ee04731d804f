use anyhow::Result;
use rusqlite::Connection;

use parley_types::models::PairState;

use crate::models::UserRow;
use crate::{Database, OptionalExt};

/// Relationship Oracle: pure reads over the contact and block tables.
/// Membership CRUD itself belongs to the external relationship service;
/// the insert helpers below are its thin adapter surface.
impl Database {
    /// Classify the sender→receiver pair at one instant. Ingestion freezes
    /// the result into the message flags; it is never re-evaluated.
    pub fn classify_pair(&self, sender: i64, receiver: i64) -> Result<PairState> {
        self.with_conn(|conn| {
            if query_blocked(conn, receiver, sender)? {
                return Ok(PairState::Blocked);
            }
            let forward = query_contact(conn, sender, receiver)?;
            let backward = query_contact(conn, receiver, sender)?;
            if forward && backward {
                Ok(PairState::Mutual)
            } else {
                Ok(PairState::OneWay)
            }
        })
    }

    pub fn has_blocked(&self, owner: i64, target: i64) -> Result<bool> {
        self.with_conn(|conn| query_blocked(conn, owner, target))
    }

    // -- Adapter surface for the external relationship service --

    pub fn add_user(&self, id: i64, handle: &str, display_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (id, handle, display_name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, handle, display_name],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, handle, display_name FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        handle: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn add_contact(&self, owner: i64, peer: i64, alias: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO contacts (owner_id, peer_id, alias) VALUES (?1, ?2, ?3)",
                rusqlite::params![owner, peer, alias],
            )?;
            Ok(())
        })
    }

    pub fn add_block(&self, owner: i64, blocked: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blocks (owner_id, blocked_id) VALUES (?1, ?2)",
                [owner, blocked],
            )?;
            Ok(())
        })
    }

    pub fn remove_block(&self, owner: i64, blocked: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM blocks WHERE owner_id = ?1 AND blocked_id = ?2",
                [owner, blocked],
            )?;
            Ok(())
        })
    }
}

fn query_contact(conn: &Connection, owner: i64, peer: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM contacts WHERE owner_id = ?1 AND peer_id = ?2",
            [owner, peer],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn query_blocked(conn: &Connection, owner: i64, target: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM blocks WHERE owner_id = ?1 AND blocked_id = ?2",
            [owner, target],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn query_contact_alias(
    conn: &Connection,
    owner: i64,
    peer: i64,
) -> Result<Option<String>> {
    let alias: Option<Option<String>> = conn
        .query_row(
            "SELECT alias FROM contacts WHERE owner_id = ?1 AND peer_id = ?2",
            [owner, peer],
            |row| row.get(0),
        )
        .optional()?;
    Ok(alias.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db
    }

    #[test]
    fn classification_covers_all_pair_states() {
        let db = db();

        // Nobody added anybody: one-way from the sender's perspective.
        assert_eq!(db.classify_pair(1, 2).unwrap(), PairState::OneWay);

        db.add_contact(1, 2, None).unwrap();
        assert_eq!(db.classify_pair(1, 2).unwrap(), PairState::OneWay);

        db.add_contact(2, 1, Some("Ally")).unwrap();
        assert_eq!(db.classify_pair(1, 2).unwrap(), PairState::Mutual);

        // A block by the receiver dominates everything else.
        db.add_block(2, 1).unwrap();
        assert_eq!(db.classify_pair(1, 2).unwrap(), PairState::Blocked);
        // But not in the other direction.
        assert_eq!(db.classify_pair(2, 1).unwrap(), PairState::Mutual);

        db.remove_block(2, 1).unwrap();
        assert_eq!(db.classify_pair(1, 2).unwrap(), PairState::Mutual);
    }
}
