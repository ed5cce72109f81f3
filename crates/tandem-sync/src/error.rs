use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a collaborator (REST API, upload endpoint, push channel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Contract violation by the caller, e.g. a second `begin` for a pending id.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("message {0} is not in this conversation")]
    UnknownMessage(Uuid),

    #[error("message has neither content nor attachments")]
    EmptyMessage,

    #[error("conversation session is closed")]
    SessionClosed,

    #[error(transparent)]
    Api(#[from] ApiError),
}
