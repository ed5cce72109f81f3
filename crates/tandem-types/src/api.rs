use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, LocalId, MessageStatus, Reaction, ReplyPreview};

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    /// A single space when the message only carries attachments.
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    /// Echoed back on the confirmed message and on the `new-message` push.
    pub local_id: LocalId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionMark {
    pub user_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

/// A message as the server returns it, from `send`, `listMessages`, or a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub starred_by: Vec<Uuid>,
    #[serde(default)]
    pub pinned_by: Vec<Uuid>,
    #[serde(default)]
    pub deleted_by: Vec<DeletionMark>,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    #[serde(default)]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub forwarded_from: Option<Uuid>,
    #[serde(default)]
    pub local_id: Option<LocalId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub delete_for_everyone: bool,
}

// -- Reactions, pins --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinResponse {
    pub is_pinned: bool,
}

// -- Uploads --

/// One uploaded file as returned by the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<Attachment>,
}
