use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use quickchat_types::api::{
    Claims, ConversationResponse, Empty, Envelope, NewMessageResponse, SendMessageBody, SidebarResponse,
};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::state::{AppState, run_blocking};

/// All users except the caller, with unseen counts per sender.
pub async fn sidebar_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let projection = state.projection.clone();
    let users = run_blocking(move || projection.sidebar_users(claims.sub)).await?;
    Ok(Json(Envelope::ok(users)))
}

pub async fn sidebar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let projection = state.projection.clone();
    let entries = run_blocking(move || projection.sidebar_entries(claims.sub)).await?;
    Ok(Json(Envelope::ok(SidebarResponse { entries })))
}

/// Returns the conversation as stored, then marks everything the peer sent to
/// the caller as seen. The flags flip from the next fetch on.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(peer_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let reader = claims.sub;
    let messages = run_blocking(move || {
        let messages = store.conversation(reader, peer_id)?;
        let marked = store.mark_conversation_read(reader, peer_id)?;
        if marked > 0 {
            debug!("{} read {} message(s) from {}", reader, marked, peer_id);
        }
        Ok(messages)
    })
    .await?;

    Ok(Json(Envelope::ok(ConversationResponse { messages })))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    run_blocking(move || store.mark_seen(message_id, claims.sub)).await?;
    Ok(Json(Envelope::ok(Empty {}).with_message("Marked as seen")))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(peer_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .dispatcher
        .send_message(claims.sub, peer_id, payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(NewMessageResponse {
            new_message: message,
        })),
    ))
}
