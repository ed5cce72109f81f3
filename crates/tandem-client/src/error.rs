use thiserror::Error;

use tandem_sync::ApiError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(e) => api_error(e),
            other => ApiError::Transport(other.to_string()),
        }
    }
}

/// Classify a reqwest failure. Timeouts and connection errors are transport
/// failures; a body that does not parse is a decode failure.
pub(crate) fn api_error(e: reqwest::Error) -> ApiError {
    if e.is_decode() {
        ApiError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
        ApiError::Status {
            code: status.as_u16(),
            body: e.to_string(),
        }
    } else {
        ApiError::Transport(e.to_string())
    }
}
