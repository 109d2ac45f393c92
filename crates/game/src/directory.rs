//! Tracks which players are online on this node and how to reach their
//! mailbox. Every cross-player effect (apply-damage from a skill cast,
//! AOI push addressing) goes through here rather than each caller
//! threading its own `PlayerId -> PlayerHandle` map around.

use std::sync::RwLock;

use ahash::AHashMap;
use gw_common::{EntityId, PlayerId};

use crate::runtime::PlayerHandle;

#[derive(Default)]
pub struct PlayerDirectory {
    by_player: RwLock<AHashMap<PlayerId, PlayerHandle>>,
    by_entity: RwLock<AHashMap<EntityId, PlayerId>>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, player_id: PlayerId, handle: PlayerHandle) {
        self.by_entity.write().unwrap().insert(handle.entity_id, player_id);
        self.by_player.write().unwrap().insert(player_id, handle);
    }

    pub fn remove(&self, player_id: PlayerId) {
        if let Some(handle) = self.by_player.write().unwrap().remove(&player_id) {
            self.by_entity.write().unwrap().remove(&handle.entity_id);
        }
    }

    pub fn handle_of(&self, player_id: PlayerId) -> Option<PlayerHandle> {
        self.by_player.read().unwrap().get(&player_id).cloned()
    }

    pub fn player_of_entity(&self, entity_id: EntityId) -> Option<PlayerId> {
        self.by_entity.read().unwrap().get(&entity_id).copied()
    }

    pub fn is_online(&self, player_id: PlayerId) -> bool {
        self.by_player.read().unwrap().contains_key(&player_id)
    }

    pub fn online_count(&self) -> usize {
        self.by_player.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flume::bounded;

    fn handle(entity_id: EntityId) -> PlayerHandle {
        let (tx, _rx) = bounded(1);
        crate::runtime::test_support::handle_from_parts(entity_id, tx)
    }

    #[test]
    fn insert_then_lookup_round_trips_both_directions() {
        let directory = PlayerDirectory::new();
        let player_id = PlayerId::new();
        let entity_id = EntityId::from_player(player_id);
        directory.insert(player_id, handle(entity_id));

        assert!(directory.is_online(player_id));
        assert_eq!(directory.player_of_entity(entity_id), Some(player_id));
    }

    #[test]
    fn removing_a_player_clears_the_entity_reverse_lookup() {
        let directory = PlayerDirectory::new();
        let player_id = PlayerId::new();
        let entity_id = EntityId::from_player(player_id);
        directory.insert(player_id, handle(entity_id));

        directory.remove(player_id);
        assert!(!directory.is_online(player_id));
        assert_eq!(directory.player_of_entity(entity_id), None);
    }
}
