use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use tandem_types::LocalId;
use tandem_types::api::{MessageResponse, SendMessageRequest};

use crate::api::{ChatApi, Draft};
use crate::error::ApiError;

/// Content sent with an attachments-only message; the server rejects empty bodies.
const ATTACHMENT_ONLY_CONTENT: &str = " ";

/// Network half of a send: upload attachments, then submit the message
/// referencing them. Holds no state, so concurrent submissions are independent.
pub struct SendPipeline<A> {
    api: Arc<A>,
}

impl<A> Clone for SendPipeline<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: ChatApi> SendPipeline<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    pub async fn submit(
        &self,
        conversation_id: Uuid,
        local_id: LocalId,
        draft: Draft,
    ) -> Result<MessageResponse, ApiError> {
        let attachments = if draft.files.is_empty() {
            vec![]
        } else {
            debug!("Uploading {} file(s) for {}", draft.files.len(), local_id);
            self.api.upload(draft.files).await?
        };

        let content = if draft.content.trim().is_empty() && !attachments.is_empty() {
            ATTACHMENT_ONLY_CONTENT.to_string()
        } else {
            draft.content
        };

        let req = SendMessageRequest {
            content,
            attachments,
            reply_to: draft.reply_to.map(|r| r.message_id),
            local_id,
        };
        self.api.send(conversation_id, req).await
    }
}
