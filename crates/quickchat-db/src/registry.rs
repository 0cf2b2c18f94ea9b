//! Chat request records and the pending -> accepted / rejected state machine.
//!
//! Every check-then-write sequence runs inside one IMMEDIATE transaction while
//! holding the connection mutex, so two crossing requests for the same pair
//! cannot both end up pending. The partial unique index on the unordered pair
//! backs this up at the storage level.

use std::collections::HashSet;
use std::sync::Arc;

use quickchat_types::models::{ChatRequest, RequestStatus};
use rusqlite::{Connection, Row, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatRequestRow, format_timestamp, now_millis};
use crate::queries::{OptionalExt, query_user_by_id};

const REQUEST_COLUMNS: &str = "id, sender_id, receiver_id, status, created_at";

/// Result of a send that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// First request in this direction.
    Created(ChatRequest),
    /// A previous request in this direction was rejected; a new one was created.
    Resent(ChatRequest),
    /// An accepted request exists in either direction. Nothing was written.
    AlreadyConnected,
}

/// Raw request records for one user, newest first.
#[derive(Debug, Default)]
pub struct RequestLists {
    pub received: Vec<ChatRequest>,
    pub sent: Vec<ChatRequest>,
}

pub struct ConnectionRegistry {
    db: Arc<Database>,
}

impl ConnectionRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn send_request(&self, sender_id: Uuid, receiver_id: Uuid) -> ChatResult<SendOutcome> {
        if sender_id == receiver_id {
            return Err(ChatError::validation("You cannot send a chat request to yourself."));
        }

        let sender = sender_id.to_string();
        let receiver = receiver_id.to_string();

        let outcome = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if query_user_by_id(&tx, &receiver)?.is_none() {
                return Err(ChatError::NotFound("User"));
            }

            if pending_between(&tx, &receiver, &sender)?.is_some() {
                return Err(ChatError::ReverseConflict);
            }

            if connected(&tx, &sender, &receiver)? {
                return Ok(SendOutcome::AlreadyConnected);
            }

            if pending_between(&tx, &sender, &receiver)?.is_some() {
                return Err(ChatError::DuplicateRequest);
            }

            let has_history: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM chat_requests WHERE sender_id = ?1 AND receiver_id = ?2)",
                [&sender, &receiver],
                |row| row.get(0),
            )?;

            let request = ChatRequest {
                id: Uuid::new_v4(),
                sender_id,
                receiver_id,
                status: RequestStatus::Pending,
                created_at: now_millis(),
            };
            tx.execute(
                "INSERT INTO chat_requests (id, sender_id, receiver_id, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                rusqlite::params![
                    request.id.to_string(),
                    sender,
                    receiver,
                    format_timestamp(request.created_at)
                ],
            )?;
            tx.commit()?;

            Ok(if has_history {
                SendOutcome::Resent(request)
            } else {
                SendOutcome::Created(request)
            })
        })?;

        match &outcome {
            SendOutcome::Created(r) => info!("Chat request {} sent: {} -> {}", r.id, sender_id, receiver_id),
            SendOutcome::Resent(r) => info!("Chat request {} re-sent: {} -> {}", r.id, sender_id, receiver_id),
            SendOutcome::AlreadyConnected => {}
        }
        Ok(outcome)
    }

    pub fn list_requests(&self, user_id: Uuid) -> ChatResult<RequestLists> {
        let uid = user_id.to_string();
        self.db.with_conn(|conn| {
            Ok(RequestLists {
                received: query_requests(conn, "receiver_id = ?1", &uid)?,
                sent: query_requests(conn, "sender_id = ?1", &uid)?,
            })
        })
    }

    pub fn get(&self, request_id: Uuid) -> ChatResult<ChatRequest> {
        self.db
            .with_conn(|conn| query_request(conn, &request_id.to_string()))?
            .ok_or(ChatError::NotFound("Chat request"))
    }

    pub fn accept(&self, request_id: Uuid) -> ChatResult<ChatRequest> {
        self.resolve(request_id, RequestStatus::Accepted)
    }

    pub fn reject(&self, request_id: Uuid) -> ChatResult<ChatRequest> {
        self.resolve(request_id, RequestStatus::Rejected)
    }

    /// True iff an accepted request exists between the two users in either direction.
    pub fn is_connected(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<bool> {
        let (a, b) = (user_a.to_string(), user_b.to_string());
        self.db.with_conn(|conn| Ok(connected(conn, &a, &b)?))
    }

    /// Every user with an accepted request to or from `user_id`.
    pub fn connected_peer_ids(&self, user_id: Uuid) -> ChatResult<HashSet<Uuid>> {
        let uid = user_id.to_string();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                 FROM chat_requests
                 WHERE status = 'accepted' AND (sender_id = ?1 OR receiver_id = ?1)",
            )?;
            let ids = stmt
                .query_map([&uid], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
        })
    }

    /// All records between two users in either direction, oldest first.
    pub fn history(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Vec<ChatRequest>> {
        let (a, b) = (user_a.to_string(), user_b.to_string());
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_requests
                 WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at, rowid",
                REQUEST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&a, &b], request_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(ChatRequestRow::into_model).collect())
        })
    }

    fn resolve(&self, request_id: Uuid, target: RequestStatus) -> ChatResult<ChatRequest> {
        let id = request_id.to_string();

        let resolved = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current = query_request(&tx, &id)?.ok_or(ChatError::NotFound("Chat request"))?;
            if current.status == target {
                return Ok(current);
            }
            if current.status != RequestStatus::Pending {
                return Err(ChatError::AlreadyResolved(current.status));
            }

            tx.execute(
                "UPDATE chat_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
                [target.as_str(), id.as_str()],
            )?;
            tx.commit()?;

            Ok(ChatRequest {
                status: target,
                ..current
            })
        })?;

        info!("Chat request {} is now {}", request_id, resolved.status);
        Ok(resolved)
    }
}

fn pending_between(conn: &Connection, sender: &str, receiver: &str) -> anyhow::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM chat_requests WHERE sender_id = ?1 AND receiver_id = ?2 AND status = 'pending'",
        [sender, receiver],
        |row| row.get(0),
    )
    .optional()
}

fn connected(conn: &Connection, a: &str, b: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM chat_requests
            WHERE status = 'accepted'
              AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
        )",
        [a, b],
        |row| row.get(0),
    )
}

fn query_request(conn: &Connection, id: &str) -> anyhow::Result<Option<ChatRequest>> {
    let sql = format!("SELECT {} FROM chat_requests WHERE id = ?1", REQUEST_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], request_from_row)
        .optional()?
        .map(ChatRequestRow::into_model))
}

fn query_requests(conn: &Connection, filter: &str, user_id: &str) -> anyhow::Result<Vec<ChatRequest>> {
    let sql = format!(
        "SELECT {} FROM chat_requests WHERE {} ORDER BY created_at DESC, rowid DESC",
        REQUEST_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], request_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(ChatRequestRow::into_model).collect())
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRequestRow> {
    Ok(ChatRequestRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}
