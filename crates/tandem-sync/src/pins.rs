use uuid::Uuid;

use crate::store::MessageStore;

/// Pinned messages visible to the viewer, newest first, with a wrapping cursor.
#[derive(Debug, Default)]
pub struct PinnedIndex {
    all: Vec<Uuid>,
    current: usize,
}

impl PinnedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from the store. The cursor follows the message it pointed at
    /// when that message is still pinned, and is clamped into range otherwise.
    pub fn refresh(&mut self, store: &MessageStore, viewer: Uuid) {
        let focused = self.current();
        let previous_index = self.current;

        self.all = store
            .visible_for(viewer)
            .filter(|m| m.is_pinned())
            .filter_map(|m| m.server_id())
            .collect();
        self.all.reverse();

        self.current = match focused.and_then(|id| self.all.iter().position(|p| *p == id)) {
            Some(index) => index,
            None if self.all.is_empty() => 0,
            None => previous_index.min(self.all.len() - 1),
        };
    }

    pub fn all(&self) -> &[Uuid] {
        &self.all
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<Uuid> {
        self.all.get(self.current).copied()
    }

    pub fn next(&mut self) -> Option<Uuid> {
        if self.all.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.all.len();
        self.current()
    }

    pub fn previous(&mut self) -> Option<Uuid> {
        if self.all.is_empty() {
            return None;
        }
        self.current = (self.current + self.all.len() - 1) % self.all.len();
        self.current()
    }

    /// Jump to a specific pinned message. Returns false if it is not pinned.
    pub fn select(&mut self, message_id: Uuid) -> bool {
        match self.all.iter().position(|p| *p == message_id) {
            Some(index) => {
                self.current = index;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tandem_types::{LocalId, Message, MessageKey, MessageStatus};

    use crate::store::MessagePatch;

    /// Store with `n` messages spaced a minute apart, all pinned by `pinner`.
    fn pinned_store(n: usize, pinner: Uuid) -> (MessageStore, Vec<Uuid>) {
        let conv = Uuid::new_v4();
        let mut store = MessageStore::new(conv);
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = Uuid::new_v4();
            let mut msg = Message::pending(LocalId::new(), conv, Uuid::new_v4(), format!("m{}", i), vec![], None);
            msg.key = MessageKey::Confirmed(id);
            msg.created_at = base + Duration::minutes(i as i64);
            msg.status = MessageStatus::Sent;
            store.insert(msg);
            store.apply_patch(id, MessagePatch::PinnedBy([pinner].into()));
            ids.push(id);
        }
        (store, ids)
    }

    #[test]
    fn newest_first_with_wrapping_navigation() {
        let viewer = Uuid::new_v4();
        let (store, ids) = pinned_store(3, viewer);
        let mut pins = PinnedIndex::new();
        pins.refresh(&store, viewer);

        assert_eq!(pins.all(), &[ids[2], ids[1], ids[0]]);
        assert_eq!(pins.current(), Some(ids[2]));
        assert_eq!(pins.next(), Some(ids[1]));
        assert_eq!(pins.next(), Some(ids[0]));
        assert_eq!(pins.next(), Some(ids[2]));
        assert_eq!(pins.previous(), Some(ids[0]));
    }

    #[test]
    fn unpinning_last_entry_clamps_cursor() {
        let viewer = Uuid::new_v4();
        let (mut store, ids) = pinned_store(3, viewer);
        let mut pins = PinnedIndex::new();
        pins.refresh(&store, viewer);
        pins.previous();
        assert_eq!(pins.current_index(), 2);

        // Someone else unpins the message under the cursor.
        store.apply_patch(ids[0], MessagePatch::PinnedBy(Default::default()));
        pins.refresh(&store, viewer);
        assert_eq!(pins.len(), 2);
        assert!(pins.current_index() < pins.len());
    }

    #[test]
    fn cursor_follows_message_when_others_change() {
        let viewer = Uuid::new_v4();
        let (mut store, ids) = pinned_store(3, viewer);
        let mut pins = PinnedIndex::new();
        pins.refresh(&store, viewer);
        assert!(pins.select(ids[1]));

        store.apply_patch(ids[2], MessagePatch::PinnedBy(Default::default()));
        pins.refresh(&store, viewer);
        assert_eq!(pins.current(), Some(ids[1]));
    }

    #[test]
    fn emptied_index_resets_to_zero() {
        let viewer = Uuid::new_v4();
        let (mut store, ids) = pinned_store(1, viewer);
        let mut pins = PinnedIndex::new();
        pins.refresh(&store, viewer);

        store.remove(ids[0]);
        pins.refresh(&store, viewer);
        assert!(pins.is_empty());
        assert_eq!(pins.current_index(), 0);
        assert_eq!(pins.current(), None);
        assert_eq!(pins.next(), None);
    }
}
