//! The persisted-state document layout: one record per player, queried
//! by `player_id`, versioned for optimistic concurrency.

use gw_common::{PlayerId, Position, Stats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDocument {
    pub player_id: PlayerId,
    pub name: String,
    pub position: Position,
    pub stats: Stats,
    pub version: u64,
    pub updated_at_unix_ms: u64,
}

impl PlayerDocument {
    pub fn new_default(player_id: PlayerId, name: String, position: Position) -> Self {
        Self {
            player_id,
            name,
            position,
            stats: Stats::new_default(),
            version: 0,
            updated_at_unix_ms: 0,
        }
    }

    pub fn cache_key(player_id: PlayerId) -> String {
        format!("player:{player_id}")
    }
}
