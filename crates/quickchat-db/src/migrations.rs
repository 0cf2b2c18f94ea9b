use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            full_name   TEXT NOT NULL,
            bio         TEXT NOT NULL DEFAULT '',
            profile_pic TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_requests (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'accepted', 'rejected')),
            created_at  TEXT NOT NULL,
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_requests_sender
            ON chat_requests(sender_id, receiver_id);

        CREATE INDEX IF NOT EXISTS idx_chat_requests_receiver
            ON chat_requests(receiver_id);

        -- At most one live pending request per unordered pair
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_requests_one_pending
            ON chat_requests(min(sender_id, receiver_id), max(sender_id, receiver_id))
            WHERE status = 'pending';

        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            text        TEXT,
            image       TEXT,
            seen        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            CHECK (text IS NOT NULL OR image IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unseen
            ON messages(receiver_id, seen);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
