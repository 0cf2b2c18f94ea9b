//! Append-only message log. This is the only writer of the `seen` flag.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quickchat_types::models::Message;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{MessageRow, format_timestamp, now_millis};
use crate::queries::OptionalExt;

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, receiver_id, text, image, seen, created_at";

pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new unseen message. Blank text counts as absent.
    ///
    /// `created_at` never goes backwards relative to the previous insert, so
    /// ordering by (created_at, seq) is always insertion order.
    pub fn append(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        text: Option<String>,
        image: Option<String>,
    ) -> ChatResult<Message> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Err(ChatError::validation("Message must contain text or an image."));
        }

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let last: Option<String> = tx
                .query_row(
                    "SELECT created_at FROM messages ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let mut created_at = now_millis();
            if let Some(last) = last.and_then(|raw| raw.parse::<DateTime<Utc>>().ok()) {
                created_at = created_at.max(last);
            }

            let message = Message {
                id: Uuid::new_v4(),
                sender_id,
                receiver_id,
                text,
                image,
                seen: false,
                created_at,
            };

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![
                    message.id.to_string(),
                    sender_id.to_string(),
                    receiver_id.to_string(),
                    message.text,
                    message.image,
                    format_timestamp(created_at)
                ],
            )?;
            tx.commit()?;

            Ok(message)
        })
    }

    pub fn get(&self, message_id: Uuid) -> ChatResult<Message> {
        self.db
            .with_conn(|conn| query_message(conn, &message_id.to_string()))?
            .ok_or(ChatError::NotFound("Message"))
    }

    /// Messages exchanged between two users in either direction, oldest first.
    pub fn conversation(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Vec<Message>> {
        let (a, b) = (user_a.to_string(), user_b.to_string());
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at, seq",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&a, &b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(MessageRow::into_model).collect())
        })
    }

    /// Mark everything `peer_id` sent to `reader_id` as seen. Returns how many flipped.
    pub fn mark_conversation_read(&self, reader_id: Uuid, peer_id: Uuid) -> ChatResult<usize> {
        let (reader, peer) = (reader_id.to_string(), peer_id.to_string());
        self.db.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET seen = 1 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                [&peer, &reader],
            )?)
        })
    }

    /// Mark a single message as seen. Only its receiver may do this; any other
    /// caller gets `NotFound` so message ids do not leak.
    pub fn mark_seen(&self, message_id: Uuid, reader_id: Uuid) -> ChatResult<Message> {
        let (id, reader) = (message_id.to_string(), reader_id.to_string());
        self.db.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET seen = 1 WHERE id = ?1 AND receiver_id = ?2",
                [&id, &reader],
            )?;
            if updated == 0 {
                return Err(ChatError::NotFound("Message"));
            }
            query_message(conn, &id)?.ok_or(ChatError::NotFound("Message"))
        })
    }

    /// Unseen messages addressed to `user_id`, counted per sender. Senders
    /// with nothing unseen are absent.
    pub fn unseen_counts_for(&self, user_id: Uuid) -> ChatResult<HashMap<Uuid, u32>> {
        let uid = user_id.to_string();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND seen = 0
                 GROUP BY sender_id",
            )?;
            let rows = stmt
                .query_map([&uid], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(sender, count)| sender.parse().ok().map(|id| (id, count)))
                .collect())
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> anyhow::Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], message_from_row)
        .optional()?
        .map(MessageRow::into_model))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        text: row.get(4)?,
        image: row.get(5)?,
        seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}
