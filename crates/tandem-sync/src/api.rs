use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_types::ClientCommand;
use tandem_types::api::{MessageResponse, PinResponse, SendMessageRequest};
use tandem_types::models::{Attachment, ReplyPreview};

use crate::error::ApiError;

/// A file waiting to be uploaded with an outgoing message.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
}

/// What the user composed. Kept by the write tracker so a failed send can be
/// re-issued, uploads included.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub content: String,
    pub files: Vec<UploadFile>,
    pub reply_to: Option<ReplyPreview>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.files.is_empty()
    }
}

/// Request/response half of the server contract.
///
/// `react`, `pin` and `star` toggle: calling twice with the same arguments
/// undoes the first call.
pub trait ChatApi: Send + Sync + 'static {
    fn send(
        &self,
        conversation_id: Uuid,
        req: SendMessageRequest,
    ) -> impl Future<Output = Result<MessageResponse, ApiError>> + Send;

    fn edit(&self, message_id: Uuid, content: String) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn react(&self, message_id: Uuid, emoji: String) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn pin(&self, message_id: Uuid) -> impl Future<Output = Result<PinResponse, ApiError>> + Send;

    fn star(&self, message_id: Uuid) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn delete(
        &self,
        message_id: Uuid,
        delete_for_everyone: bool,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<MessageResponse>, ApiError>> + Send;

    fn upload(&self, files: Vec<UploadFile>) -> impl Future<Output = Result<Vec<Attachment>, ApiError>> + Send;
}

/// Outbound half of the push channel. Commands are queued, not awaited.
pub trait PushSink: Send + 'static {
    fn send_command(&self, cmd: ClientCommand) -> Result<(), ApiError>;
}

impl PushSink for mpsc::UnboundedSender<ClientCommand> {
    fn send_command(&self, cmd: ClientCommand) -> Result<(), ApiError> {
        self.send(cmd)
            .map_err(|_| ApiError::Transport("push channel closed".into()))
    }
}
