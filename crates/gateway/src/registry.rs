//! In-memory table of live sessions, keyed by `SessionId` with a
//! secondary `PlayerId` index for push delivery and duplicate-session
//! detection. Mirrors the reference daemon's connection registry shape
//! (a concurrent map plus a narrower reverse-lookup index) but keyed to
//! this protocol's session/player identifiers rather than MOO object ids.

use ahash::AHashMap;
use gw_common::{PlayerId, SessionId};
use std::sync::{Arc, RwLock};

use crate::session::Session;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<AHashMap<SessionId, Arc<Session>>>,
    by_player: RwLock<AHashMap<PlayerId, SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .unwrap()
            .insert(session.session_id, session);
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(&session_id).cloned()
    }

    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().unwrap().remove(&session_id);
        if let Some(session) = &removed {
            if let Some(player_id) = session.player_id() {
                self.by_player.write().unwrap().remove(&player_id);
            }
        }
        removed
    }

    /// Bind a newly-authenticated session to its player id. Returns the
    /// session id of a pre-existing binding for the same player, if any
    /// — the router treats that as a duplicate login and force-closes
    /// the older session.
    pub fn bind_player(&self, session_id: SessionId, player_id: PlayerId) -> Option<SessionId> {
        let previous = self
            .by_player
            .write()
            .unwrap()
            .insert(player_id, session_id);
        if let Some(session) = self.sessions.read().unwrap().get(&session_id) {
            session.set_auth_state(crate::session::AuthState::Authenticated(player_id));
        }
        previous.filter(|&prev| prev != session_id)
    }

    pub fn session_id_for_player(&self, player_id: PlayerId) -> Option<SessionId> {
        self.by_player.read().unwrap().get(&player_id).copied()
    }

    pub fn heartbeat_touch(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.read().unwrap().get(&session_id) {
            session.touch_heartbeat();
        }
    }

    /// Enqueue an outbound message directly on a specific session. Unlike
    /// [`send_to_player`](Self::send_to_player), this targets the
    /// `SessionId` the caller already holds rather than re-resolving it
    /// through `by_player` -- the indirection `bind_player` can have
    /// already repointed at a different session by the time the caller
    /// gets to send (duplicate login is the case this exists for).
    pub fn send_to_session(
        &self,
        session_id: SessionId,
        message: crate::session::Outbound,
    ) -> crate::session::PushOutcome {
        let sessions = self.sessions.read().unwrap();
        match sessions.get(&session_id) {
            Some(session) => session.try_send(message),
            None => crate::session::PushOutcome::Dropped,
        }
    }

    /// Enqueue an outbound message for `player_id`'s *current* session, if
    /// it has one. Used by the push path from the game-node event
    /// subscriber, where the current mapping is exactly what's wanted.
    pub fn send_to_player(
        &self,
        player_id: PlayerId,
        message: crate::session::Outbound,
    ) -> crate::session::PushOutcome {
        let Some(session_id) = self.session_id_for_player(player_id) else {
            return crate::session::PushOutcome::Dropped;
        };
        self.send_to_session(session_id, message)
    }

    pub fn timed_out_sessions(&self, timeout: std::time::Duration) -> Vec<SessionId> {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect()
    }

    /// All currently-registered session ids, used by graceful shutdown to
    /// enumerate who needs a shutdown notice.
    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(session_id: SessionId) -> Arc<Session> {
        Arc::new(Session::new(session_id, 8))
    }

    #[test]
    fn binding_a_second_session_to_the_same_player_reports_the_prior_one() {
        let registry = SessionRegistry::new();
        let first = SessionId::new();
        let second = SessionId::new();
        registry.insert(session(first));
        registry.insert(session(second));

        let player_id = PlayerId::new();
        assert_eq!(registry.bind_player(first, player_id), None);
        assert_eq!(registry.bind_player(second, player_id), Some(first));
        assert_eq!(registry.session_id_for_player(player_id), Some(second));
    }

    #[test]
    fn removing_a_session_clears_its_player_binding() {
        let registry = SessionRegistry::new();
        let session_id = SessionId::new();
        registry.insert(session(session_id));
        let player_id = PlayerId::new();
        registry.bind_player(session_id, player_id);

        registry.remove(session_id);
        assert_eq!(registry.session_id_for_player(player_id), None);
    }
}
