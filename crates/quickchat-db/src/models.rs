//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the quickchat-types API models.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use quickchat_types::models::{ChatRequest, Message, RequestStatus, UserProfile};
use tracing::warn;
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub bio: String,
    pub profile_pic: Option<String>,
    pub created_at: String,
}

pub struct ChatRequestRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: parse_id(&self.id, "user", &self.id),
            username: self.username,
            full_name: self.full_name,
            bio: self.bio,
            profile_pic: self.profile_pic,
        }
    }
}

impl ChatRequestRow {
    pub fn into_model(self) -> ChatRequest {
        let status = self.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on chat request '{}': {}", self.id, e);
            RequestStatus::Rejected
        });
        ChatRequest {
            id: parse_id(&self.id, "chat request", &self.id),
            sender_id: parse_id(&self.sender_id, "sender_id", &self.id),
            receiver_id: parse_id(&self.receiver_id, "receiver_id", &self.id),
            status,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

impl MessageRow {
    pub fn into_model(self) -> Message {
        Message {
            id: parse_id(&self.id, "message", &self.id),
            sender_id: parse_id(&self.sender_id, "sender_id", &self.id),
            receiver_id: parse_id(&self.receiver_id, "receiver_id", &self.id),
            text: self.text,
            image: self.image,
            seen: self.seen,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

/// Current time at the precision timestamps are stored with.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Timestamps written by this crate. Fixed width so lexical order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_id(raw: &str, field: &str, row_id: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on row '{}': {}", field, raw, row_id, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}
