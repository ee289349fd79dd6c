/// Error types for the chat synchronization engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("no user found with id {0}")]
    RecipientNotFound(String),

    #[error("you cannot start a conversation with yourself")]
    SelfConnectionDenied,

    #[error("conversation limit reached ({0} total connections)")]
    QuotaExceeded(u32),

    #[error("could not mint a free short id after {0} attempts")]
    IdentityExhausted(u32),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("offline: {0}")]
    Offline(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("partial failure: {0}")]
    PartialFailure(String),

    #[error("message text is empty")]
    EmptyMessage,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    /// Store-side authorization failures degrade to an empty result on
    /// background queries instead of surfacing to the user.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ChatError::PermissionDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
