//! Consistent-hash assignment of a player to one of the live game
//! nodes. Node health is tracked here so a failed node is skipped on
//! the next assignment without a full rehash of every other player.

use ahash::AHasher;
use gw_common::PlayerId;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub rpc_addr: String,
    pub events_addr: String,
}

pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeEndpoint>>,
    healthy: RwLock<Vec<bool>>,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<NodeEndpoint>) -> Self {
        let healthy = vec![true; nodes.len()];
        Self {
            nodes: RwLock::new(nodes),
            healthy: RwLock::new(healthy),
        }
    }

    pub fn mark_unhealthy(&self, index: usize) {
        if let Some(slot) = self.healthy.write().unwrap().get_mut(index) {
            *slot = false;
        }
    }

    pub fn mark_healthy(&self, index: usize) {
        if let Some(slot) = self.healthy.write().unwrap().get_mut(index) {
            *slot = true;
        }
    }

    /// Assign `player_id` to a live node by `hash(player_id) mod
    /// live_nodes`, skipping unhealthy nodes by probing forward. Returns
    /// `None` only if every node is unhealthy.
    pub fn assign(&self, player_id: PlayerId) -> Option<(usize, NodeEndpoint)> {
        let nodes = self.nodes.read().unwrap();
        let healthy = self.healthy.read().unwrap();
        if nodes.is_empty() {
            return None;
        }
        let mut hasher = AHasher::default();
        player_id.hash(&mut hasher);
        let start = (hasher.finish() as usize) % nodes.len();

        for offset in 0..nodes.len() {
            let index = (start + offset) % nodes.len();
            if healthy[index] {
                return Some((index, nodes[index].clone()));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(n: usize) -> NodeEndpoint {
        NodeEndpoint {
            rpc_addr: format!("tcp://node-{n}:8081"),
            events_addr: format!("tcp://node-{n}:8082"),
        }
    }

    #[test]
    fn assignment_is_stable_for_the_same_player() {
        let registry = NodeRegistry::new(vec![endpoint(0), endpoint(1), endpoint(2)]);
        let player_id = PlayerId::new();
        let first = registry.assign(player_id).unwrap().0;
        let second = registry.assign(player_id).unwrap().0;
        assert_eq!(first, second);
    }

    #[test]
    fn unhealthy_node_is_skipped() {
        let registry = NodeRegistry::new(vec![endpoint(0), endpoint(1)]);
        let player_id = PlayerId::new();
        let (index, _) = registry.assign(player_id).unwrap();
        registry.mark_unhealthy(index);
        let (reassigned, _) = registry.assign(player_id).unwrap();
        assert_ne!(reassigned, index);
    }

    #[test]
    fn all_nodes_unhealthy_returns_none() {
        let registry = NodeRegistry::new(vec![endpoint(0)]);
        registry.mark_unhealthy(0);
        assert!(registry.assign(PlayerId::new()).is_none());
    }
}
