use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY,
            handle          TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL DEFAULT ''
        );

        -- One row per direction: owner added peer.
        CREATE TABLE IF NOT EXISTS contacts (
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            peer_id     INTEGER NOT NULL REFERENCES users(id),
            alias       TEXT,
            UNIQUE(owner_id, peer_id)
        );

        CREATE TABLE IF NOT EXISTS blocks (
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            blocked_id  INTEGER NOT NULL REFERENCES users(id),
            UNIQUE(owner_id, blocked_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id          INTEGER PRIMARY KEY,
            room        TEXT NOT NULL UNIQUE,
            title       TEXT NOT NULL,
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            disbanded   INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    INTEGER NOT NULL REFERENCES groups(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member'
                        CHECK (role IN ('owner', 'admin', 'member')),
            alias       TEXT,
            UNIQUE(group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            room                TEXT NOT NULL,
            kind                TEXT NOT NULL
                                CHECK (kind IN ('private', 'group', 'assistant')),
            media               TEXT NOT NULL
                                CHECK (media IN ('text', 'image', 'video',
                                                 'file', 'system', 'forwarded')),
            sender_id           INTEGER NOT NULL,
            receiver_id         INTEGER NOT NULL,
            payload             TEXT NOT NULL,
            size                INTEGER NOT NULL DEFAULT 0,
            created_at          INTEGER NOT NULL,
            delivered           INTEGER NOT NULL DEFAULT 0,
            recalled            INTEGER NOT NULL DEFAULT 0,
            mention_all         INTEGER NOT NULL DEFAULT 0,
            requires_gating     INTEGER NOT NULL DEFAULT 0,
            sent_while_blocked  INTEGER NOT NULL DEFAULT 0,
            notice_code         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room, created_at, id);

        -- Per-user hide; rows are never physically deleted.
        CREATE TABLE IF NOT EXISTS tombstones (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS read_markers (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS mentions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS mention_reads (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            UNIQUE(message_id, user_id)
        );

        -- Incremented in place, never recomputed from a scan.
        CREATE TABLE IF NOT EXISTS room_counters (
            room            TEXT PRIMARY KEY,
            message_count   INTEGER NOT NULL DEFAULT 0,
            updated_at      INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS room_pins (
            user_id INTEGER NOT NULL,
            room    TEXT NOT NULL,
            UNIQUE(user_id, room)
        );

        CREATE TABLE IF NOT EXISTS room_mutes (
            user_id INTEGER NOT NULL,
            room    TEXT NOT NULL,
            UNIQUE(user_id, room)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
