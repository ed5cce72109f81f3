use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    online: bool,
    typing_until: Option<Instant>,
}

/// Ephemeral per-peer state: online flag and typing deadline.
///
/// Typing expires on its own once the deadline passes; a `typing-stop` event
/// only clears it earlier.
#[derive(Debug)]
pub struct PresenceTracker {
    peers: HashMap<Uuid, PeerState>,
    typing_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(typing_ttl: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            typing_ttl,
        }
    }

    pub fn typing_start(&mut self, user_id: Uuid, now: Instant) {
        trace!("{} typing until +{:?}", user_id, self.typing_ttl);
        self.peers.entry(user_id).or_default().typing_until = Some(now + self.typing_ttl);
    }

    pub fn typing_stop(&mut self, user_id: Uuid) {
        if let Some(peer) = self.peers.get_mut(&user_id) {
            peer.typing_until = None;
        }
    }

    pub fn is_typing(&self, user_id: Uuid, now: Instant) -> bool {
        self.peers
            .get(&user_id)
            .and_then(|p| p.typing_until)
            .is_some_and(|until| now < until)
    }

    pub fn typing_users(&self, now: Instant) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, p)| p.typing_until.is_some_and(|until| now < until))
            .map(|(id, _)| *id)
            .collect();
        users.sort();
        users
    }

    /// Earliest typing deadline still in the future, for scheduling a refresh.
    pub fn next_expiry(&self, now: Instant) -> Option<Instant> {
        self.peers
            .values()
            .filter_map(|p| p.typing_until)
            .filter(|until| *until > now)
            .min()
    }

    /// Clear expired typing deadlines. Returns how many were cleared.
    pub fn prune(&mut self, now: Instant) -> usize {
        let mut cleared = 0;
        for peer in self.peers.values_mut() {
            if peer.typing_until.is_some_and(|until| until <= now) {
                peer.typing_until = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn set_online(&mut self, user_id: Uuid, online: bool) {
        let peer = self.peers.entry(user_id).or_default();
        peer.online = online;
        if !online {
            peer.typing_until = None;
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.peers.get(&user_id).is_some_and(|p| p.online)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(id, _)| *id)
            .collect();
        users.sort();
        users
    }
}

/// Send side of typing: re-emit `typing-start` at most once per interval
/// while composing, and a single `typing-stop` when composing ends.
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Called on every keystroke. Returns true if a `typing-start` should go out.
    pub fn on_input(&mut self, now: Instant) -> bool {
        let due = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    /// Called when composing ends (sent, cleared, left). Returns true if a
    /// `typing-stop` should go out.
    pub fn on_stop(&mut self) -> bool {
        self.last_emit.take().is_some()
    }
}
