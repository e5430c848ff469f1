use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            first_name      TEXT,
            last_name       TEXT,
            role            TEXT NOT NULL DEFAULT 'driver',
            avatar_url      TEXT,
            corporate_id    TEXT,
            program_ids     TEXT NOT NULL DEFAULT '[]',
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS discussions (
            id              TEXT PRIMARY KEY,
            discussion_type TEXT NOT NULL CHECK (discussion_type IN ('personal', 'group')),
            title           TEXT,
            created_by      TEXT NOT NULL REFERENCES users(id),
            corporate_id    TEXT,
            program_id      TEXT,
            is_open         INTEGER NOT NULL DEFAULT 0,
            tagged_user_ids TEXT NOT NULL DEFAULT '[]',
            tagged_role_ids TEXT NOT NULL DEFAULT '[]',
            last_message_id TEXT,
            last_message_at TEXT,
            archived_at     TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS discussion_participants (
            id                   TEXT PRIMARY KEY,
            discussion_id        TEXT NOT NULL REFERENCES discussions(id),
            user_id              TEXT NOT NULL REFERENCES users(id),
            joined_at            TEXT NOT NULL,
            left_at              TEXT,
            last_read_message_id TEXT,
            last_read_at         TEXT,
            is_pinned            INTEGER NOT NULL DEFAULT 0,
            is_muted             INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_participants_discussion
            ON discussion_participants(discussion_id, left_at);
        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON discussion_participants(user_id, left_at);

        CREATE TABLE IF NOT EXISTS discussion_messages (
            id                TEXT PRIMARY KEY,
            discussion_id     TEXT NOT NULL REFERENCES discussions(id),
            content           TEXT NOT NULL,
            parent_message_id TEXT,
            author_id         TEXT NOT NULL REFERENCES users(id),
            read_by           TEXT NOT NULL DEFAULT '[]',
            reactions         TEXT NOT NULL DEFAULT '[]',
            deleted_at        TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_discussion
            ON discussion_messages(discussion_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_author
            ON discussion_messages(author_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
