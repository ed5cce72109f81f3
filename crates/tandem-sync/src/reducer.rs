//! Maps inbound push events to store, presence and typing mutations.
//!
//! `reduce` reads the store but never writes to it; the caller applies the
//! returned actions in order.

use uuid::Uuid;

use tandem_types::{ChatEvent, LocalId, Message};

use crate::store::{MessagePatch, MessageStore};

/// Identity the reducer filters against. Built fresh for every event so a
/// long-lived subscription never sees a stale user or conversation.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext {
    pub self_id: Uuid,
    pub conversation_id: Uuid,
    /// A send of ours is waiting for its HTTP response.
    pub awaiting_send_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Insert(Message),
    /// A push echo of our own send, carrying the provisional id.
    Reconcile { local_id: LocalId, message: Message },
    /// Our own message with no provisional id while a send is in flight.
    /// It is either that send's echo or came from another window; the
    /// caller holds it until the pending sends resolve.
    HoldOwnEcho(Message),
    Patch { message_id: Uuid, patch: MessagePatch },
    Remove { message_id: Uuid },
    Typing { user_id: Uuid, is_typing: bool },
    Presence { user_id: Uuid, online: bool },
    AnnouncePresence,
}

pub fn reduce(event: ChatEvent, ctx: &ReduceContext, store: &MessageStore) -> Vec<Action> {
    if event.conversation_id() != ctx.conversation_id {
        return vec![];
    }

    match event {
        ChatEvent::NewMessage { message } => {
            let local_id = message.local_id;
            let message = Message::from(message);
            if message.sender_id != ctx.self_id {
                return vec![Action::Insert(message)];
            }
            match local_id {
                Some(local_id) => vec![Action::Reconcile { local_id, message }],
                // Our own message without an echo id. While a send is in
                // flight it may be that send's echo, so it waits. Otherwise it
                // came from another window and nothing optimistic can clash.
                None if ctx.awaiting_send_confirmation => vec![Action::HoldOwnEcho(message)],
                None => vec![Action::Insert(message)],
            }
        }

        ChatEvent::MessagesSeen {
            seen_by,
            message_ids,
            seen_at,
            ..
        } => {
            let unread_by_reader = |m: &Message| m.sender_id != seen_by && !m.read_by.contains_key(&seen_by);
            let targets: Vec<Uuid> = if message_ids.is_empty() {
                store
                    .iter()
                    .filter(|&m| unread_by_reader(m))
                    .filter_map(|m| m.server_id())
                    .collect()
            } else {
                message_ids
                    .into_iter()
                    .filter(|id| store.get_confirmed(*id).is_some_and(unread_by_reader))
                    .collect()
            };
            targets
                .into_iter()
                .map(|message_id| Action::Patch {
                    message_id,
                    patch: MessagePatch::Seen {
                        user_id: seen_by,
                        at: seen_at,
                    },
                })
                .collect()
        }

        ChatEvent::UserTyping { user_id, is_typing, .. } => {
            if user_id == ctx.self_id {
                return vec![];
            }
            vec![Action::Typing { user_id, is_typing }]
        }

        ChatEvent::PresenceRequest { from_user_id, .. } => {
            if from_user_id == ctx.self_id {
                return vec![];
            }
            vec![Action::AnnouncePresence]
        }

        ChatEvent::PresenceUpdate { user_id, online, .. } => {
            if user_id == ctx.self_id {
                return vec![];
            }
            vec![Action::Presence { user_id, online }]
        }

        // Wholesale sets apply whoever the actor was: the server always sends
        // the full resulting set, so our own toggle is already reflected in it
        // alongside everyone else's.
        ChatEvent::MessageReactionUpdated {
            message_id,
            reactions,
            ..
        } => vec![Action::Patch {
            message_id,
            patch: MessagePatch::Reactions(reactions.into_iter().collect()),
        }],

        ChatEvent::MessageEdited {
            message_id, content, ..
        } => vec![Action::Patch {
            message_id,
            patch: MessagePatch::Edited { content },
        }],

        ChatEvent::MessageStarUpdated {
            message_id,
            starred_by,
            ..
        } => vec![Action::Patch {
            message_id,
            patch: MessagePatch::StarredBy(starred_by.into_iter().collect()),
        }],

        ChatEvent::MessagePinUpdated {
            message_id,
            pinned_by,
            ..
        } => vec![Action::Patch {
            message_id,
            patch: MessagePatch::PinnedBy(pinned_by.into_iter().collect()),
        }],

        ChatEvent::MessageDeleted {
            message_id,
            user_id,
            deleted_at,
            ..
        } => vec![Action::Patch {
            message_id,
            patch: MessagePatch::DeletedFor {
                user_id,
                at: deleted_at,
            },
        }],

        ChatEvent::MessageDeletedForEveryone { message_id, .. } => vec![Action::Remove { message_id }],
    }
}
