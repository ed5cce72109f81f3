use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use tandem_types::{LocalId, Message, MessageKey, MessageStatus, Reaction};

/// Position of a message in the conversation.
///
/// Confirmed messages sort by server timestamp, then insertion sequence.
/// Pending messages always sort after every confirmed one, in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OrderKey {
    Confirmed(DateTime<Utc>, u64),
    Pending(u64),
}

impl OrderKey {
    fn for_message(key: &MessageKey, created_at: DateTime<Utc>, seq: u64) -> Self {
        match key {
            MessageKey::Confirmed(_) => Self::Confirmed(created_at, seq),
            MessageKey::Pending(_) => Self::Pending(seq),
        }
    }

    fn seq(&self) -> u64 {
        match self {
            Self::Confirmed(_, seq) | Self::Pending(seq) => *seq,
        }
    }
}

/// A partial update to a confirmed message.
///
/// Set-valued variants are idempotent: applying the same patch twice leaves
/// the message as applying it once.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePatch {
    Edited { content: String },
    /// Full reaction set, replacing whatever the store holds.
    Reactions(BTreeSet<Reaction>),
    StarredBy(BTreeSet<Uuid>),
    PinnedBy(BTreeSet<Uuid>),
    /// Append a read receipt and move the status to `seen`.
    Seen { user_id: Uuid, at: DateTime<Utc> },
    /// Append a per-user soft delete.
    DeletedFor { user_id: Uuid, at: DateTime<Utc> },
    Status(MessageStatus),
}

impl MessagePatch {
    /// Returns true if the message changed.
    fn apply(self, msg: &mut Message) -> bool {
        match self {
            Self::Edited { content } => {
                let changed = msg.content != content || !msg.is_edited;
                msg.content = content;
                msg.is_edited = true;
                changed
            }
            Self::Reactions(reactions) => replace(&mut msg.reactions, reactions),
            Self::StarredBy(users) => replace(&mut msg.starred_by, users),
            Self::PinnedBy(users) => replace(&mut msg.pinned_by, users),
            Self::Seen { user_id, at } => {
                let before = msg.status;
                let inserted = !msg.read_by.contains_key(&user_id);
                msg.read_by.entry(user_id).or_insert(at);
                msg.status = msg.status.merge(MessageStatus::Seen);
                inserted || before != msg.status
            }
            Self::DeletedFor { user_id, at } => {
                if msg.deleted_by.contains_key(&user_id) {
                    return false;
                }
                msg.deleted_by.insert(user_id, at);
                true
            }
            Self::Status(status) => {
                let before = msg.status;
                msg.status = msg.status.merge(status);
                before != msg.status
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// How a confirmation was folded into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The optimistic entry was swapped for the server copy.
    Replaced,
    /// The server copy was already present (its push event won the race).
    /// The optimistic entry, if any, was dropped.
    Merged,
    /// No optimistic entry existed; the server copy was inserted.
    Inserted,
    /// The server id was deleted for everyone; nothing was kept.
    Dropped,
}

/// Ordered, deduplicated messages of a single conversation.
#[derive(Debug)]
pub struct MessageStore {
    conversation_id: Uuid,
    messages: BTreeMap<OrderKey, Message>,
    index: HashMap<MessageKey, OrderKey>,
    /// Ids deleted for everyone. Never re-admitted.
    tombstones: HashSet<Uuid>,
    next_seq: u64,
}

impl MessageStore {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: BTreeMap::new(),
            index: HashMap::new(),
            tombstones: HashSet::new(),
            next_seq: 0,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.index.get(key).and_then(|order| self.messages.get(order))
    }

    pub fn get_confirmed(&self, id: Uuid) -> Option<&Message> {
        self.get(&MessageKey::Confirmed(id))
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn is_tombstoned(&self, id: Uuid) -> bool {
        self.tombstones.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.index.keys().filter(|k| k.is_pending()).count()
    }

    /// Every stored message in conversation order, including soft-deleted ones.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + Clone + '_ {
        self.messages.values()
    }

    /// Messages `user_id` can see, in conversation order. The iterator is lazy
    /// and can be cloned to restart from the beginning.
    pub fn visible_for(&self, user_id: Uuid) -> impl Iterator<Item = &Message> + Clone + '_ {
        self.messages.values().filter(move |m| m.is_visible_to(user_id))
    }

    /// Add a message. No-op if its key is already present, its id was deleted
    /// for everyone, or it belongs to another conversation.
    pub fn insert(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            debug!(
                "Ignoring insert of {} for conversation {}",
                message.key, message.conversation_id
            );
            return false;
        }
        if let Some(id) = message.server_id() {
            if self.tombstones.contains(&id) {
                trace!("Ignoring insert of tombstoned message {}", id);
                return false;
            }
        }
        if self.index.contains_key(&message.key) {
            trace!("Ignoring duplicate insert of {}", message.key);
            return false;
        }
        let seq = self.bump_seq();
        self.put(message, seq);
        true
    }

    /// Swap the optimistic entry `local_id` for the confirmed `server` copy.
    /// Dedupe by server id wins: if the confirmed copy is already stored, the
    /// optimistic entry is discarded instead of producing a second row.
    pub fn reconcile(&mut self, local_id: LocalId, server: Message) -> Reconciled {
        let Some(server_id) = server.server_id() else {
            debug!("Refusing to reconcile {} with an unconfirmed message", local_id);
            return Reconciled::Dropped;
        };

        let local = self.take(&MessageKey::Pending(local_id));

        if self.tombstones.contains(&server_id) {
            debug!("Confirmation for {} arrived after delete-for-everyone", server_id);
            return Reconciled::Dropped;
        }

        if let Some(order) = self.index.get(&MessageKey::Confirmed(server_id)).copied() {
            if let Some(existing) = self.messages.get_mut(&order) {
                existing.status = existing.status.merge(server.status);
            }
            debug!("Merged confirmation {} -> {} into existing copy", local_id, server_id);
            return Reconciled::Merged;
        }

        let (seq, outcome) = match local {
            Some((seq, _)) => (seq, Reconciled::Replaced),
            None => (self.bump_seq(), Reconciled::Inserted),
        };
        if server.conversation_id != self.conversation_id {
            return Reconciled::Dropped;
        }
        debug!("Reconciled {} -> {} ({:?})", local_id, server_id, outcome);
        self.put(server, seq);
        outcome
    }

    /// Merge a partial update into a confirmed message. Unknown ids are a no-op.
    pub fn apply_patch(&mut self, id: Uuid, patch: MessagePatch) -> bool {
        let Some(order) = self.index.get(&MessageKey::Confirmed(id)).copied() else {
            trace!("Patch for unknown message {} ignored", id);
            return false;
        };
        match self.messages.get_mut(&order) {
            Some(msg) => patch.apply(msg),
            None => false,
        }
    }

    /// Drop a message deleted for everyone. The id is remembered so that no
    /// later event or history page can bring it back.
    pub fn remove(&mut self, id: Uuid) -> Option<Message> {
        self.tombstones.insert(id);
        self.take(&MessageKey::Confirmed(id)).map(|(_, mut msg)| {
            msg.deleted_for_everyone = true;
            msg
        })
    }

    /// Drop an optimistic entry, e.g. after its send failed.
    pub fn remove_pending(&mut self, local_id: LocalId) -> Option<Message> {
        self.take(&MessageKey::Pending(local_id)).map(|(_, msg)| msg)
    }

    pub fn set_pending_status(&mut self, local_id: LocalId, status: MessageStatus) -> bool {
        let Some(order) = self.index.get(&MessageKey::Pending(local_id)).copied() else {
            return false;
        };
        match self.messages.get_mut(&order) {
            Some(msg) => {
                msg.status = status;
                true
            }
            None => false,
        }
    }

    /// Fold a fetched history page into the store without discarding state
    /// that push events applied while the fetch was in flight. Returns the
    /// number of newly inserted messages.
    pub fn merge_history(&mut self, history: Vec<Message>) -> usize {
        let mut inserted = 0;
        for fetched in history {
            let Some(id) = fetched.server_id() else {
                continue;
            };
            if self.tombstones.contains(&id) {
                continue;
            }
            if fetched.deleted_for_everyone {
                self.remove(id);
                continue;
            }
            match self.index.get(&MessageKey::Confirmed(id)).copied() {
                Some(order) => {
                    if let Some(existing) = self.messages.get_mut(&order) {
                        for (user_id, at) in fetched.read_by {
                            existing.read_by.entry(user_id).or_insert(at);
                        }
                        for (user_id, at) in fetched.deleted_by {
                            existing.deleted_by.entry(user_id).or_insert(at);
                        }
                        existing.status = existing.status.merge(fetched.status);
                    }
                }
                None => {
                    if self.insert(fetched) {
                        inserted += 1;
                    }
                }
            }
        }
        inserted
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn put(&mut self, message: Message, seq: u64) {
        let order = OrderKey::for_message(&message.key, message.created_at, seq);
        self.index.insert(message.key, order);
        self.messages.insert(order, message);
    }

    fn take(&mut self, key: &MessageKey) -> Option<(u64, Message)> {
        let order = self.index.remove(key)?;
        self.messages.remove(&order).map(|msg| (order.seq(), msg))
    }
}
