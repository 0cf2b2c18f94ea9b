use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use quickchat_db::ChatError;
use quickchat_types::api::Envelope;

/// Every failure leaves the API as `{ success: false, message }`. Business
/// failures use 4xx; store or runtime failures use 500 so clients can tell
/// them apart without parsing the message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Not authorized")]
    Unauthorized,

    #[error("{0}")]
    Conflict(String),

    #[error("Request body is too large.")]
    TooLarge,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Chat(e) => match e {
                ChatError::ReverseConflict
                | ChatError::DuplicateRequest
                | ChatError::AlreadyResolved(_) => StatusCode::CONFLICT,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                ChatError::Forbidden | ChatError::NotConnected => StatusCode::FORBIDDEN,
                ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
                ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Store or runtime failures, as opposed to anything the caller got wrong.
    pub fn is_hard(&self) -> bool {
        match self {
            Self::Chat(e) => !e.is_business(),
            Self::Internal(_) => true,
            _ => false,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::TooLarge;
        }
        Self::Chat(ChatError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Chat(ChatError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Chat(ChatError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_hard() {
            error!("{}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(Envelope::declined(message))).into_response()
    }
}
