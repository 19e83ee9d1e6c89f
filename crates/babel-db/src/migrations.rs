use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            group_id            TEXT NOT NULL REFERENCES chat_groups(id),
            username            TEXT NOT NULL,
            original_text       TEXT NOT NULL,
            translated_texts    TEXT NOT NULL DEFAULT '{}',
            language            TEXT NOT NULL,
            message_type        TEXT NOT NULL CHECK (message_type IN ('user', 'system')),
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, created_at);

        CREATE TABLE IF NOT EXISTS user_presence (
            group_id    TEXT NOT NULL REFERENCES chat_groups(id),
            username    TEXT NOT NULL,
            language    TEXT NOT NULL,
            is_online   INTEGER NOT NULL DEFAULT 1,
            last_seen   TEXT NOT NULL,
            PRIMARY KEY (group_id, username)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
