use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the authenticated session
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid, username: String },

    /// A message addressed to this user was persisted
    NewMessage(Message),

    /// The full set of users with a live session, sent whenever it changes
    #[serde(rename_all = "camelCase")]
    OnlineUsers { user_ids: HashSet<Uuid> },
}
