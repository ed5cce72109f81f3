use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{MessageResponse, ReactionGroup};

/// Provisional id generated on the client for a message the server has not
/// confirmed yet. Echoed back by the server on the confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}", self.0)
    }
}

/// The authoritative identity of a message. A message is keyed by its
/// provisional id until the server confirms it, and by the server id after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageKey {
    Confirmed(Uuid),
    Pending(LocalId),
}

impl MessageKey {
    pub fn server_id(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Confirmed(_) => None,
            Self::Pending(local_id) => Some(*local_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{}", id),
            Self::Pending(local_id) => write!(f, "{}", local_id),
        }
    }
}

/// Delivery state of a message. Declared in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Seen,
    Failed,
}

impl MessageStatus {
    /// Combine two observations of the same message without ever moving
    /// backwards through sending -> sent -> delivered -> seen.
    /// `Failed` only sticks until any other observation arrives.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failed, next) => next,
            (current, Self::Failed) => current,
            (current, next) => current.max(next),
        }
    }
}

/// A single user's reaction. A user holds at most one of each emoji per message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub file_type: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Snapshot of the message being replied to. Relation only: the replied-to
/// message can be deleted without touching this copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageKey,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Server timestamp once confirmed, local clock while pending.
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub read_by: BTreeMap<Uuid, DateTime<Utc>>,
    pub reactions: BTreeSet<Reaction>,
    pub starred_by: BTreeSet<Uuid>,
    pub pinned_by: BTreeSet<Uuid>,
    pub deleted_by: BTreeMap<Uuid, DateTime<Utc>>,
    pub deleted_for_everyone: bool,
    pub reply_to: Option<ReplyPreview>,
    pub is_edited: bool,
    pub forwarded_from: Option<Uuid>,
}

impl Message {
    /// Build the optimistic copy of an outgoing message.
    pub fn pending(
        local_id: LocalId,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<ReplyPreview>,
    ) -> Self {
        Self {
            key: MessageKey::Pending(local_id),
            conversation_id,
            sender_id,
            content,
            attachments,
            created_at: Utc::now(),
            status: MessageStatus::Sending,
            read_by: BTreeMap::new(),
            reactions: BTreeSet::new(),
            starred_by: BTreeSet::new(),
            pinned_by: BTreeSet::new(),
            deleted_by: BTreeMap::new(),
            deleted_for_everyone: false,
            reply_to,
            is_edited: false,
            forwarded_from: None,
        }
    }

    pub fn server_id(&self) -> Option<Uuid> {
        self.key.server_id()
    }

    pub fn is_pinned(&self) -> bool {
        !self.pinned_by.is_empty()
    }

    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        !self.deleted_for_everyone && !self.deleted_by.contains_key(&user_id)
    }

    pub fn reaction_count(&self, emoji: &str) -> usize {
        self.reactions.iter().filter(|r| r.emoji == emoji).count()
    }

    /// Group reactions by emoji for display, in emoji order.
    pub fn reaction_groups(&self) -> Vec<ReactionGroup> {
        let mut groups: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
        for r in &self.reactions {
            groups.entry(r.emoji.as_str()).or_default().push(r.user_id);
        }
        groups
            .into_iter()
            .map(|(emoji, user_ids)| ReactionGroup {
                emoji: emoji.to_string(),
                count: user_ids.len(),
                user_ids,
            })
            .collect()
    }
}

impl From<MessageResponse> for Message {
    fn from(resp: MessageResponse) -> Self {
        Self {
            key: MessageKey::Confirmed(resp.id),
            conversation_id: resp.conversation_id,
            sender_id: resp.sender_id,
            content: resp.content,
            attachments: resp.attachments,
            created_at: resp.created_at,
            status: resp.status.unwrap_or(MessageStatus::Sent),
            read_by: resp
                .read_by
                .into_iter()
                .map(|r| (r.user_id, r.read_at))
                .collect(),
            reactions: resp.reactions.into_iter().collect(),
            starred_by: resp.starred_by.into_iter().collect(),
            pinned_by: resp.pinned_by.into_iter().collect(),
            deleted_by: resp
                .deleted_by
                .into_iter()
                .map(|d| (d.user_id, d.deleted_at))
                .collect(),
            deleted_for_everyone: resp.deleted_for_everyone,
            reply_to: resp.reply_to,
            is_edited: resp.is_edited,
            forwarded_from: resp.forwarded_from,
        }
    }
}
