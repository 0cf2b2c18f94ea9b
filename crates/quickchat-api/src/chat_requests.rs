use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use quickchat_db::{ChatError, SendOutcome};
use quickchat_types::api::{ChatRequestResponse, Claims, Envelope, SendChatRequestBody};
use quickchat_types::models::RequestStatus;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::state::{AppState, run_blocking};

pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendChatRequestBody>,
) -> Result<Response, ApiError> {
    let registry = state.registry.clone();
    let sender_id = claims.sub;
    let outcome =
        run_blocking(move || registry.send_request(sender_id, req.receiver_id)).await?;

    let response = match outcome {
        SendOutcome::Created(request) => (
            StatusCode::CREATED,
            Json(Envelope::ok(ChatRequestResponse { request }).with_message("Chat request sent.")),
        )
            .into_response(),
        SendOutcome::Resent(request) => (
            StatusCode::CREATED,
            Json(
                Envelope::ok(ChatRequestResponse { request })
                    .with_message("Chat request re-sent."),
            ),
        )
            .into_response(),
        SendOutcome::AlreadyConnected => {
            Json(Envelope::declined("You are already connected.")).into_response()
        }
    };
    Ok(response)
}

pub async fn list_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let projection = state.projection.clone();
    let inbox = run_blocking(move || projection.request_inbox(claims.sub)).await?;
    Ok(Json(Envelope::ok(inbox)))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(request_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(state, claims.sub, request_id, RequestStatus::Accepted).await
}

pub async fn reject_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(request_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(state, claims.sub, request_id, RequestStatus::Rejected).await
}

/// Only the receiver of a request may resolve it.
async fn resolve(
    state: AppState,
    caller: Uuid,
    request_id: Uuid,
    target: RequestStatus,
) -> Result<Json<Envelope<ChatRequestResponse>>, ApiError> {
    let registry = state.registry.clone();
    let request = run_blocking(move || {
        let request = registry.get(request_id)?;
        if request.receiver_id != caller {
            return Err(ChatError::Forbidden);
        }
        match target {
            RequestStatus::Accepted => registry.accept(request_id),
            _ => registry.reject(request_id),
        }
    })
    .await?;

    let message = match target {
        RequestStatus::Accepted => "Chat request accepted.",
        _ => "Chat request rejected.",
    };
    Ok(Json(Envelope::ok(ChatRequestResponse { request }).with_message(message)))
}
