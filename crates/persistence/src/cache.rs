//! The read-through cache sitting in front of the primary store.
//!
//! Holds the hot working set of online (and recently online) players'
//! documents plus a presence marker per player, so the gateway can
//! reject a second login for an already-online player without a round
//! trip to the primary store.

use gw_common::PlayerId;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::document::PlayerDocument;

struct Entry {
    document: PlayerDocument,
    dirty: bool,
    last_touched: Instant,
}

/// Presence state for duplicate-login detection. A player is `Online`
/// from the moment login succeeds until logout or the disconnect-grace
/// window expires; `Grace` covers an abrupt disconnect where the game
/// node hasn't yet decided whether the client will reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Grace,
}

/// In-memory read-through cache. Not itself durable: every entry here
/// is either clean (already flushed to the primary store) or dirty
/// (newer than the primary store and owed a flush).
pub struct Cache {
    entries: RwLock<HashMap<PlayerId, Entry>>,
    presence: RwLock<HashMap<PlayerId, (Presence, Instant)>>,
    grace_period: Duration,
}

impl Cache {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            grace_period,
        }
    }

    pub fn get(&self, player_id: PlayerId) -> Option<PlayerDocument> {
        self.entries
            .read()
            .unwrap()
            .get(&player_id)
            .map(|e| e.document.clone())
    }

    /// Insert or replace a document freshly hydrated from the primary
    /// store. Hydration always produces a clean entry.
    pub fn hydrate(&self, document: PlayerDocument) {
        let player_id = document.player_id;
        self.entries.write().unwrap().insert(
            player_id,
            Entry {
                document,
                dirty: false,
                last_touched: Instant::now(),
            },
        );
    }

    /// Record a state change against the cached copy, marking it dirty
    /// so the flush loop knows to write it behind.
    pub fn put_dirty(&self, document: PlayerDocument) {
        let player_id = document.player_id;
        self.entries.write().unwrap().insert(
            player_id,
            Entry {
                document,
                dirty: true,
                last_touched: Instant::now(),
            },
        );
    }

    pub fn is_dirty(&self, player_id: PlayerId) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(&player_id)
            .map(|e| e.dirty)
            .unwrap_or(false)
    }

    pub fn mark_clean(&self, player_id: PlayerId) {
        if let Some(entry) = self.entries.write().unwrap().get_mut(&player_id) {
            entry.dirty = false;
        }
    }

    /// All player ids whose cache entry is currently dirty -- the flush
    /// loop's candidate set for a periodic write-behind pass.
    pub fn dirty_players(&self) -> Vec<PlayerId> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn evict(&self, player_id: PlayerId) {
        self.entries.write().unwrap().remove(&player_id);
    }

    pub fn mark_online(&self, player_id: PlayerId) {
        self.presence
            .write()
            .unwrap()
            .insert(player_id, (Presence::Online, Instant::now()));
    }

    /// Transition a player into the disconnect-grace window rather than
    /// clearing presence outright, so a reconnect within the window is
    /// treated as the same session resuming rather than a fresh login.
    pub fn mark_grace(&self, player_id: PlayerId) {
        self.presence
            .write()
            .unwrap()
            .insert(player_id, (Presence::Grace, Instant::now()));
    }

    pub fn clear_presence(&self, player_id: PlayerId) {
        self.presence.write().unwrap().remove(&player_id);
    }

    /// Whether `player_id` is currently considered online -- either
    /// actively connected, or within its disconnect-grace window. A
    /// login attempt against an `Online` presence is a duplicate login;
    /// against `Grace`, a reconnect.
    pub fn presence_of(&self, player_id: PlayerId) -> Option<Presence> {
        let mut presence = self.presence.write().unwrap();
        match presence.get(&player_id).copied() {
            Some((Presence::Grace, since)) if since.elapsed() > self.grace_period => {
                presence.remove(&player_id);
                None
            }
            other => other.map(|(p, _)| p),
        }
    }

    /// Player ids whose grace window has elapsed -- candidates for a
    /// final flush-and-evict pass, since no reconnect is coming.
    pub fn expired_grace_players(&self) -> Vec<PlayerId> {
        self.presence
            .read()
            .unwrap()
            .iter()
            .filter(|(_, (p, since))| {
                *p == Presence::Grace && since.elapsed() > self.grace_period
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::Position;

    fn doc(player_id: PlayerId) -> PlayerDocument {
        PlayerDocument::new_default(player_id, "p".to_string(), Position::new(1, 0.0, 0.0, 0.0, 0.0))
    }

    #[test]
    fn hydrate_then_get_round_trips_and_is_clean() {
        let cache = Cache::new(Duration::from_secs(30));
        let player_id = PlayerId::new();
        cache.hydrate(doc(player_id));
        assert!(cache.get(player_id).is_some());
        assert!(!cache.is_dirty(player_id));
    }

    #[test]
    fn put_dirty_marks_entry_for_flush() {
        let cache = Cache::new(Duration::from_secs(30));
        let player_id = PlayerId::new();
        cache.put_dirty(doc(player_id));
        assert!(cache.is_dirty(player_id));
        assert_eq!(cache.dirty_players(), vec![player_id]);
        cache.mark_clean(player_id);
        assert!(!cache.is_dirty(player_id));
    }

    #[test]
    fn online_presence_blocks_until_cleared() {
        let cache = Cache::new(Duration::from_secs(30));
        let player_id = PlayerId::new();
        assert_eq!(cache.presence_of(player_id), None);
        cache.mark_online(player_id);
        assert_eq!(cache.presence_of(player_id), Some(Presence::Online));
        cache.clear_presence(player_id);
        assert_eq!(cache.presence_of(player_id), None);
    }

    #[test]
    fn grace_presence_expires_after_the_window() {
        let cache = Cache::new(Duration::from_millis(1));
        let player_id = PlayerId::new();
        cache.mark_grace(player_id);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.presence_of(player_id), None);
    }
}
