use anyhow::Result;
use rusqlite::Connection;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            slug             TEXT PRIMARY KEY,
            password_digest  TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            room_slug   TEXT NOT NULL REFERENCES rooms(slug),
            client_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (room_slug, client_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_room
            ON participants(room_slug, joined_at);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_slug   TEXT NOT NULL REFERENCES rooms(slug),
            kind        TEXT NOT NULL CHECK (kind IN ('user', 'event')),
            body        TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            sender_name TEXT,
            sent_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_slug, sent_at);
        ",
    )?;

    Ok(())
}
