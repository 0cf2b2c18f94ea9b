use quickchat_types::models::RequestStatus;
use thiserror::Error;

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Business failures carry a user-facing message; `Persistence` is the only
/// variant that signals an unexpected store failure.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("This user has already sent you a chat request. Please check your received requests.")]
    ReverseConflict,

    #[error("Chat request already sent.")]
    DuplicateRequest,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("You are not allowed to do that.")]
    Forbidden,

    #[error("You can only message users you are connected with.")]
    NotConnected,

    #[error("Chat request was already {0}.")]
    AlreadyResolved(RequestStatus),

    #[error("Upload failed: {0}")]
    Upstream(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.into())
    }
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for failures the caller caused, as opposed to store outages.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}
