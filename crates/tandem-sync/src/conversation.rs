//! The synchronization engine for one open conversation.
//!
//! `Conversation` owns the message store, the pending writes, the presence
//! map and the pinned index, and is the only thing that mutates them. It does
//! no I/O: callers feed it push events and network results and send whatever
//! commands it hands back.

use std::collections::HashMap;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use tandem_types::api::MessageResponse;
use tandem_types::{Attachment, ChatEvent, ClientCommand, LocalId, Message};

use crate::api::Draft;
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError};
use crate::pins::PinnedIndex;
use crate::presence::{PresenceTracker, TypingThrottle};
use crate::reducer::{Action, ReduceContext, reduce};
use crate::store::{MessagePatch, MessageStore, Reconciled};
use crate::tracker::{FailOutcome, WriteOp, WriteTracker};

/// Result of resolving a send with its network outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Confirmed { message_id: Uuid },
    /// `retained` is true when the entry stays in the store flagged `failed`.
    Failed { error: ApiError, retained: bool },
    /// Nobody was waiting for this result anymore.
    Orphaned,
}

/// What applying one push event did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Messages, typing or presence changed.
    pub changed: bool,
    /// A peer asked for our presence; answer with `presence_announce`.
    pub announce_presence: bool,
}

/// Immutable view of the conversation for rendering.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub conversation_id: Uuid,
    /// Messages visible to the local user, in conversation order.
    pub messages: Vec<Message>,
    /// Pinned message ids, newest first.
    pub pinned: Vec<Uuid>,
    pub pinned_cursor: usize,
    pub typing: Vec<Uuid>,
    pub online: Vec<Uuid>,
    pub pending_sends: usize,
    pub closed: bool,
}

impl Snapshot {
    pub fn current_pin(&self) -> Option<Uuid> {
        self.pinned.get(self.pinned_cursor).copied()
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.server_id() == Some(id))
    }
}

pub struct Conversation {
    conversation_id: Uuid,
    self_id: Uuid,
    config: SyncConfig,
    store: MessageStore,
    tracker: WriteTracker,
    presence: PresenceTracker,
    typing: TypingThrottle,
    pins: PinnedIndex,
    /// Own messages without a provisional id that arrived while a send was
    /// in flight, keyed by server id.
    held_echoes: HashMap<Uuid, Message>,
    closed: bool,
}

impl Conversation {
    pub fn new(conversation_id: Uuid, self_id: Uuid, config: SyncConfig) -> Self {
        Self {
            conversation_id,
            self_id,
            store: MessageStore::new(conversation_id),
            tracker: WriteTracker::new(),
            presence: PresenceTracker::new(config.typing_ttl),
            typing: TypingThrottle::new(config.typing_reemit_interval),
            pins: PinnedIndex::new(),
            held_echoes: HashMap::new(),
            config,
            closed: false,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn self_id(&self) -> Uuid {
        self.self_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn tracker(&self) -> &WriteTracker {
        &self.tracker
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn pins(&self) -> &PinnedIndex {
        &self.pins
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Insert the optimistic copy of `draft` and register the pending send.
    /// The caller then runs the network half and reports back through
    /// `complete_send`.
    pub fn begin_send(&mut self, draft: Draft) -> Result<LocalId, SyncError> {
        if self.closed {
            return Err(SyncError::SessionClosed);
        }
        if draft.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let local_id = LocalId::new();
        // Upload descriptors are not known yet; show what the user picked.
        let placeholders = draft
            .files
            .iter()
            .map(|f| Attachment {
                url: String::new(),
                file_type: f.mime.clone(),
                file_size: f.bytes.len() as u64,
                duration: None,
            })
            .collect();
        let optimistic = Message::pending(
            local_id,
            self.conversation_id,
            self.self_id,
            draft.content.clone(),
            placeholders,
            draft.reply_to.clone(),
        );

        self.tracker.begin(local_id, WriteOp::Send(draft))?;
        self.store.insert(optimistic);
        debug!("Queued send {} in {}", local_id, self.conversation_id);
        Ok(local_id)
    }

    pub fn complete_send(
        &mut self,
        local_id: LocalId,
        result: Result<MessageResponse, ApiError>,
    ) -> SendOutcome {
        if self.closed {
            debug!("Dropping send result for {} after close", local_id);
            return SendOutcome::Orphaned;
        }

        let outcome = match result {
            Ok(resp) => {
                let server = Message::from(resp);
                let Some(message_id) = server.server_id() else {
                    return SendOutcome::Orphaned;
                };
                // Our own echo of this send needs no separate insert.
                self.held_echoes.remove(&message_id);
                match self.tracker.confirm(local_id, server, &mut self.store) {
                    Some(_) => SendOutcome::Confirmed { message_id },
                    // The push echo already reconciled it.
                    None if self.store.get_confirmed(message_id).is_some() => {
                        SendOutcome::Confirmed { message_id }
                    }
                    None => SendOutcome::Orphaned,
                }
            }
            Err(error) => {
                match self
                    .tracker
                    .fail(local_id, &error, self.config.failure_policy, &mut self.store)
                {
                    Some(FailOutcome::Discarded) => SendOutcome::Failed { error, retained: false },
                    Some(FailOutcome::MarkedFailed) => SendOutcome::Failed { error, retained: true },
                    None => SendOutcome::Orphaned,
                }
            }
        };
        self.release_held_echoes();
        self.refresh_pins();
        outcome
    }

    /// Re-arm a failed send. Returns the draft to submit again.
    pub fn retry_send(&mut self, local_id: LocalId) -> Result<Draft, SyncError> {
        if self.closed {
            return Err(SyncError::SessionClosed);
        }
        match self.tracker.retry(local_id, &mut self.store)? {
            WriteOp::Send(draft) => {
                debug!("Retrying send {}", local_id);
                Ok(draft)
            }
        }
    }

    /// Run one push event through the reducer and apply the result. Events
    /// for other conversations and events after close are ignored.
    pub fn apply_event(&mut self, event: ChatEvent, now: Instant) -> Applied {
        let mut applied = Applied::default();
        if self.closed {
            return applied;
        }
        let kind = event.kind();
        let ctx = ReduceContext {
            self_id: self.self_id,
            conversation_id: self.conversation_id,
            awaiting_send_confirmation: self.tracker.has_sends_in_flight(),
        };

        let mut messages_changed = false;
        for action in reduce(event, &ctx, &self.store) {
            match action {
                Action::Insert(message) => {
                    let sender = message.sender_id;
                    if self.store.insert(message) {
                        messages_changed = true;
                        self.presence.typing_stop(sender);
                    }
                }
                Action::Reconcile { local_id, message } => {
                    if let Some(id) = message.server_id() {
                        self.held_echoes.remove(&id);
                    }
                    let reconciled = match self.tracker.confirm(local_id, message.clone(), &mut self.store) {
                        Some(outcome) => Some(outcome),
                        None => self.store.insert(message).then_some(Reconciled::Inserted),
                    };
                    messages_changed |= reconciled.is_some();
                }
                Action::HoldOwnEcho(message) => {
                    if let Some(id) = message.server_id() {
                        debug!("Holding own message {} until pending sends resolve", id);
                        self.held_echoes.insert(id, message);
                    }
                }
                Action::Patch { message_id, patch } => {
                    messages_changed |= self.store.apply_patch(message_id, patch);
                }
                Action::Remove { message_id } => {
                    messages_changed |= self.store.remove(message_id).is_some();
                }
                Action::Typing { user_id, is_typing } => {
                    if is_typing {
                        self.presence.typing_start(user_id, now);
                    } else {
                        self.presence.typing_stop(user_id);
                    }
                    applied.changed = true;
                }
                Action::Presence { user_id, online } => {
                    self.presence.set_online(user_id, online);
                    applied.changed = true;
                }
                Action::AnnouncePresence => applied.announce_presence = true,
            }
        }

        messages_changed |= self.release_held_echoes();

        if messages_changed {
            debug!("Applied {} to {}", kind, self.conversation_id);
            self.refresh_pins();
            applied.changed = true;
        }
        applied
    }

    /// Fold a history page into the store. Returns how many messages were new.
    pub fn merge_history(&mut self, history: Vec<MessageResponse>) -> usize {
        if self.closed {
            return 0;
        }
        let inserted = self
            .store
            .merge_history(history.into_iter().map(Message::from).collect());
        self.refresh_pins();
        info!("Merged history into {}: {} new", self.conversation_id, inserted);
        inserted
    }

    /// Mirror a delete the server accepted. The matching push event then
    /// finds nothing left to do.
    pub fn apply_local_delete(&mut self, message_id: Uuid, delete_for_everyone: bool) -> bool {
        if self.closed {
            return false;
        }
        let changed = if delete_for_everyone {
            self.store.remove(message_id).is_some()
        } else {
            self.store.apply_patch(
                message_id,
                MessagePatch::DeletedFor {
                    user_id: self.self_id,
                    at: Utc::now(),
                },
            )
        };
        if changed {
            self.refresh_pins();
        }
        changed
    }

    /// Only confirmed messages can be edited, reacted to, pinned or deleted.
    pub fn ensure_known(&self, message_id: Uuid) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::SessionClosed);
        }
        match self.store.get_confirmed(message_id) {
            Some(_) => Ok(()),
            None => Err(SyncError::UnknownMessage(message_id)),
        }
    }

    pub fn visible(&self) -> impl Iterator<Item = &Message> + Clone + '_ {
        self.store.visible_for(self.self_id)
    }

    pub fn visible_for(&self, user_id: Uuid) -> impl Iterator<Item = &Message> + Clone + '_ {
        self.store.visible_for(user_id)
    }

    pub fn typing_users(&self, now: Instant) -> Vec<Uuid> {
        self.presence.typing_users(now)
    }

    pub fn next_typing_expiry(&self, now: Instant) -> Option<Instant> {
        self.presence.next_expiry(now)
    }

    /// Clear typing flags whose deadline passed. Returns true if any did.
    pub fn prune_typing(&mut self, now: Instant) -> bool {
        self.presence.prune(now) > 0
    }

    /// Local keystroke. Returns the `typing-start` to send, if one is due.
    pub fn typing_input(&mut self, now: Instant) -> Option<ClientCommand> {
        if self.closed || !self.typing.on_input(now) {
            return None;
        }
        Some(self.typing_command(true))
    }

    /// Composing ended. Returns the `typing-stop` to send, if one is due.
    pub fn end_typing(&mut self) -> Option<ClientCommand> {
        self.typing.on_stop().then(|| self.typing_command(false))
    }

    pub fn presence_announce(&self) -> ClientCommand {
        ClientCommand::PresenceAnnounce {
            conversation_id: self.conversation_id,
            online: !self.closed,
        }
    }

    pub fn next_pin(&mut self) -> Option<Uuid> {
        self.pins.next()
    }

    pub fn previous_pin(&mut self) -> Option<Uuid> {
        self.pins.previous()
    }

    pub fn select_pin(&mut self, message_id: Uuid) -> bool {
        self.pins.select(message_id)
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            conversation_id: self.conversation_id,
            messages: self.visible().cloned().collect(),
            pinned: self.pins.all().to_vec(),
            pinned_cursor: self.pins.current_index(),
            typing: self.presence.typing_users(now),
            online: self.presence.online_users(),
            pending_sends: self.tracker.len(),
            closed: self.closed,
        }
    }

    /// Tear down: every pending write is abandoned and later results for
    /// them are dropped. Returns the abandoned ids.
    pub fn close(&mut self) -> Vec<LocalId> {
        if self.closed {
            return vec![];
        }
        self.closed = true;
        self.held_echoes.clear();
        let abandoned = self.tracker.abandon();
        info!(
            "Closed conversation {} ({} pending write(s) abandoned)",
            self.conversation_id,
            abandoned.len()
        );
        abandoned
    }

    fn typing_command(&self, is_typing: bool) -> ClientCommand {
        ClientCommand::Typing {
            conversation_id: self.conversation_id,
            is_typing,
        }
    }

    /// Insert held own messages once no send is left that could claim them.
    /// Returns true if any was new to the store.
    fn release_held_echoes(&mut self) -> bool {
        if self.held_echoes.is_empty() || self.tracker.has_sends_in_flight() {
            return false;
        }
        let mut inserted = false;
        for (_, message) in self.held_echoes.drain() {
            inserted |= self.store.insert(message);
        }
        inserted
    }

    fn refresh_pins(&mut self) {
        self.pins.refresh(&self.store, self.self_id);
    }
}
