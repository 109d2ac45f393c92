//! Per-node front for the AOI grid (C7): owns one [`Grid`] per map,
//! translates grid enter/leave/move diffs into pushed [`ClientEvent`]s,
//! and forwards cross-player effects (skill damage) to the target's
//! mailbox via the [`PlayerDirectory`].
//!
//! Each map's grid is behind its own mutex rather than one lock for the
//! whole node, so players on different maps never contend.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use gw_aoi::Grid;
use gw_common::config::AoiConfig;
use gw_common::{EntityId, PlayerId, Position};
use gw_rpc::{CastSkillResult, ClientEvent, PositionWire, SkillCastOutcome};
use gw_rpc::transport::RpcTransport;
use tracing::warn;

use crate::directory::PlayerDirectory;
use crate::runtime::PlayerCommand;

struct PushContext {
    rpc: Arc<RpcTransport>,
    directory: Arc<PlayerDirectory>,
}

pub struct AoiHub {
    config: AoiConfig,
    grids: Mutex<AHashMap<u32, Grid>>,
    entity_maps: Mutex<AHashMap<EntityId, u32>>,
    /// Last-known defense stat per entity, refreshed by each player
    /// runtime on every tick that touches combat stats. Lets `CastSkill`
    /// resolve a target's defense the same way it resolves a target's
    /// position: a synchronous snapshot read through the hub rather than
    /// a round trip into the target's own mailbox.
    defenses: Mutex<AHashMap<EntityId, i64>>,
    push: Option<PushContext>,
}

impl AoiHub {
    pub fn new(config: AoiConfig, rpc: Arc<RpcTransport>, directory: Arc<PlayerDirectory>) -> Arc<Self> {
        Arc::new(Self {
            config,
            grids: Mutex::new(AHashMap::new()),
            entity_maps: Mutex::new(AHashMap::new()),
            defenses: Mutex::new(AHashMap::new()),
            push: Some(PushContext { rpc, directory }),
        })
    }

    /// A hub with no push context, for tests that only exercise grid
    /// math through the player runtime without a live RPC transport.
    #[cfg(test)]
    pub fn single_map(cell_size: f32, neighborhood: i64) -> Arc<Self> {
        Arc::new(Self {
            config: AoiConfig {
                cell_size,
                neighborhood,
            },
            grids: Mutex::new(AHashMap::new()),
            entity_maps: Mutex::new(AHashMap::new()),
            defenses: Mutex::new(AHashMap::new()),
            push: None,
        })
    }

    /// Record `entity_id`'s current defense stat for later `CastSkill`
    /// resolution against this entity as a target. Called by the owning
    /// player runtime whenever stats change (login, level/gear change,
    /// buffs/debuffs).
    pub fn set_defense(&self, entity_id: EntityId, defense: i64) {
        self.defenses.lock().unwrap().insert(entity_id, defense);
    }

    /// Remove a defense snapshot on logout/despawn so stale data can't
    /// be read back for a reused entity id.
    pub fn clear_defense(&self, entity_id: EntityId) {
        self.defenses.lock().unwrap().remove(&entity_id);
    }

    /// The last known defense for `entity_id`, or `1` (the formula's own
    /// floor) if no snapshot has been recorded -- an offline or
    /// never-seen target.
    pub fn defense_of(&self, entity_id: EntityId) -> i64 {
        self.defenses
            .lock()
            .unwrap()
            .get(&entity_id)
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    fn with_grid<R>(&self, map_id: u32, f: impl FnOnce(&mut Grid) -> R) -> R {
        let mut grids = self.grids.lock().unwrap();
        let grid = grids
            .entry(map_id)
            .or_insert_with(|| Grid::new(self.config.cell_size, self.config.neighborhood));
        f(grid)
    }

    pub fn enter(&self, _player_id: PlayerId, entity_id: EntityId, position: Position) {
        let map_id = position.map_id;
        self.entity_maps.lock().unwrap().insert(entity_id, map_id);
        let observers = self.with_grid(map_id, |grid| grid.enter(entity_id, position));

        self.push_entity_enter(entity_id, position, &observers);
        for &observer in &observers {
            if let Some(observer_pos) = self.with_grid(map_id, |grid| grid.position_of(observer)) {
                self.push_entity_enter(observer, observer_pos, &[entity_id]);
            }
        }
    }

    pub fn leave(&self, entity_id: EntityId) {
        let Some(map_id) = self.entity_maps.lock().unwrap().remove(&entity_id) else {
            return;
        };
        let observers = self.with_grid(map_id, |grid| grid.leave(entity_id));
        self.push_event(&observers, ClientEvent::EntityLeave { entity_id });
    }

    pub fn mv(&self, entity_id: EntityId, new_position: Position) {
        let Some(map_id) = self.entity_maps.lock().unwrap().get(&entity_id).copied() else {
            return;
        };
        let delta = self.with_grid(map_id, |grid| grid.mv(entity_id, new_position));

        // Client reconciliation relies on this exact ordering: an
        // observer leaving view, then any position update for observers
        // that stayed in view, then newly-entered observers last.
        self.push_event(&delta.left_view, ClientEvent::EntityLeave { entity_id });
        self.push_event(
            &delta.position_update,
            ClientEvent::PositionUpdate {
                entity_id,
                position: to_wire(new_position),
            },
        );
        self.push_entity_enter(entity_id, new_position, &delta.entered_view);
    }

    pub fn position_of(&self, entity_id: EntityId) -> Option<Position> {
        let map_id = *self.entity_maps.lock().unwrap().get(&entity_id)?;
        self.with_grid(map_id, |grid| grid.position_of(entity_id))
    }

    pub fn observers_of(&self, entity_id: EntityId) -> Vec<EntityId> {
        let Some(map_id) = self.entity_maps.lock().unwrap().get(&entity_id).copied() else {
            return Vec::new();
        };
        self.with_grid(map_id, |grid| grid.observers_of(entity_id))
    }

    /// Route `ApplyDamage` to whichever player runtime owns `target`, if
    /// it's a player entity currently online on this node.
    pub fn push_apply_damage(&self, target: EntityId, amount: i64, source: EntityId) {
        let Some(push) = &self.push else { return };
        let Some(target_player) = push.directory.player_of_entity(target) else {
            return;
        };
        let Some(handle) = push.directory.handle_of(target_player) else {
            return;
        };
        if let Err(err) = handle.try_send(PlayerCommand::ApplyDamage { amount, source }) {
            warn!(?err, player_id = %target_player, "apply-damage mailbox send failed");
        }
    }

    /// Broadcast a `CastSkill` result to the union of the caster's and
    /// the target's observer sets (plus the target itself), so entities
    /// that can see the target but not the caster still see the hit.
    pub fn push_skill_result(
        &self,
        caster: EntityId,
        target: Option<EntityId>,
        caster_observers: Vec<EntityId>,
        damage: i64,
        crit: bool,
    ) {
        let event = ClientEvent::SkillResult {
            caster,
            target,
            result: CastSkillResult {
                outcome: SkillCastOutcome::Hit,
                damage,
                crit,
                cooldown_until_ms: 0,
            },
        };
        let mut recipients = caster_observers;
        if let Some(target) = target {
            for observer in self.observers_of(target) {
                if !recipients.contains(&observer) {
                    recipients.push(observer);
                }
            }
            if !recipients.contains(&target) {
                recipients.push(target);
            }
        }
        self.push_event(&recipients, event);
    }

    pub fn push_death(&self, entity_id: EntityId) {
        let observers = self.observers_of(entity_id);
        self.push_event(
            &observers,
            ClientEvent::SystemMessage(format!("{entity_id} has died")),
        );
    }

    fn push_entity_enter(&self, entity_id: EntityId, position: Position, recipients: &[EntityId]) {
        self.push_event(
            recipients,
            ClientEvent::EntityEnter {
                entity_id,
                position: to_wire(position),
            },
        );
    }

    fn push_event(&self, recipients: &[EntityId], event: ClientEvent) {
        let Some(push) = &self.push else { return };
        let player_ids: Vec<PlayerId> = recipients
            .iter()
            .filter_map(|&entity_id| push.directory.player_of_entity(entity_id))
            .collect();
        if player_ids.is_empty() {
            return;
        }
        if let Err(err) = push.rpc.push_to_many(&player_ids, event) {
            warn!(%err, "aoi push delivery failed");
        }
    }
}

fn to_wire(position: Position) -> PositionWire {
    PositionWire {
        map_id: position.map_id,
        x: position.x,
        y: position.y,
        z: position.z,
        facing: position.facing,
    }
}
