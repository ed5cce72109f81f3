use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;
use crate::models::Reaction;

/// Events pushed by the server over the gateway socket.
///
/// Reactions, stars and pins carry the full resulting set after the toggle.
/// Read receipts and per-user deletions are incremental.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// A message was posted. `message.local_id` is set when the server knows
    /// the sender's provisional id.
    NewMessage { message: MessageResponse },

    /// `seen_by` read the listed messages. An empty list means every message
    /// in the conversation not sent by `seen_by`.
    MessagesSeen {
        conversation_id: Uuid,
        seen_by: Uuid,
        #[serde(default)]
        message_ids: Vec<Uuid>,
        seen_at: DateTime<Utc>,
    },

    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// Another participant asks who is online.
    PresenceRequest {
        conversation_id: Uuid,
        from_user_id: Uuid,
    },

    PresenceUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        online: bool,
    },

    MessageReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        actor_id: Uuid,
        reactions: Vec<Reaction>,
    },

    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        content: String,
        edited_by: Uuid,
    },

    MessageStarUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        starred_by: Vec<Uuid>,
    },

    MessagePinUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        pinned_by: Vec<Uuid>,
    },

    /// `user_id` deleted the message for themselves only.
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        deleted_at: DateTime<Utc>,
    },

    MessageDeletedForEveryone {
        conversation_id: Uuid,
        message_id: Uuid,
    },
}

impl ChatEvent {
    /// Every event is scoped to exactly one conversation.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::NewMessage { message } => message.conversation_id,
            Self::MessagesSeen { conversation_id, .. }
            | Self::UserTyping { conversation_id, .. }
            | Self::PresenceRequest { conversation_id, .. }
            | Self::PresenceUpdate { conversation_id, .. }
            | Self::MessageReactionUpdated { conversation_id, .. }
            | Self::MessageEdited { conversation_id, .. }
            | Self::MessageStarUpdated { conversation_id, .. }
            | Self::MessagePinUpdated { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::MessageDeletedForEveryone { conversation_id, .. } => *conversation_id,
        }
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new-message",
            Self::MessagesSeen { .. } => "messages-seen",
            Self::UserTyping { .. } => "user-typing",
            Self::PresenceRequest { .. } => "presence-request",
            Self::PresenceUpdate { .. } => "presence-update",
            Self::MessageReactionUpdated { .. } => "message-reaction-updated",
            Self::MessageEdited { .. } => "message-edited",
            Self::MessageStarUpdated { .. } => "message-star-updated",
            Self::MessagePinUpdated { .. } => "message-pin-updated",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::MessageDeletedForEveryone { .. } => "message-deleted-for-everyone",
        }
    }
}

/// Commands sent FROM client TO server over the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Authenticate the socket
    Identify { token: String },

    /// Start receiving events for a conversation
    JoinChat { conversation_id: Uuid },

    LeaveChat { conversation_id: Uuid },

    Typing { conversation_id: Uuid, is_typing: bool },

    /// Ask the other participants to announce their presence
    PresenceRequest { conversation_id: Uuid },

    /// Answer to a presence request
    PresenceAnnounce { conversation_id: Uuid, online: bool },
}
