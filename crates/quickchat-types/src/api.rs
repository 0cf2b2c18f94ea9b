use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatRequest, Message, RelationStatus, UserProfile};

// -- JWT Claims --

/// JWT claims shared across quickchat-api (REST middleware) and the gateway
/// upgrade handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Envelope --

/// Every REST response is wrapped as `{ success, message?, ...data }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope<Empty> {
    /// A `success: false` body for business outcomes that are not HTTP errors.
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: Empty {},
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Empty {}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

// -- Chat requests --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatRequestBody {
    pub receiver_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ChatRequestResponse {
    pub request: ChatRequest,
}

/// A request record joined with the profile of the other party.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEntry {
    #[serde(flatten)]
    pub request: ChatRequest,
    pub peer: UserProfile,
}

#[derive(Debug, Default, Serialize)]
pub struct RequestInbox {
    pub received: Vec<RequestEntry>,
    pub sent: Vec<RequestEntry>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageBody {
    pub text: Option<String>,
    /// Base64 image, optionally as a `data:<mime>;base64,` URL.
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageResponse {
    pub new_message: Message,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarUsersResponse {
    pub users: Vec<UserProfile>,
    pub unseen_messages: HashMap<Uuid, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SidebarEntry {
    pub user: UserProfile,
    pub online: bool,
    pub unseen: u32,
}

#[derive(Debug, Serialize)]
pub struct SidebarResponse {
    pub entries: Vec<SidebarEntry>,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindableUser {
    pub user: UserProfile,
    pub status: RelationStatus,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse<T> {
    pub users: Vec<T>,
}
