//! Player Runtime (C6): one actor-like mailbox per logged-in player. A
//! bounded `flume` channel carries [`PlayerCommand`]s to a single
//! executor task that owns the player's aggregate exclusively, which is
//! what lets the rest of the game node skip per-player locking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use gw_common::config::{CombatConfig, MovementConfig};
use gw_common::{EntityId, PlayerId, Position, SkillTable, Stats};
use gw_persistence::PersistenceGateway;
use gw_rpc::{AntiCheatFlags, CastSkillResult, PositionWire, SkillCastOutcome};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aoi_hub::AoiHub;
use crate::mapdata::MapTable;

/// `Offline → Authenticating → Online ↔ Combat → Online → LogoutPending
/// → Offline`, with `Online → Dead → Respawning → Online` on the side.
/// `Combat` is a soft flag (see [`PlayerAggregate::touch_combat`]) rather
/// than a distinct state the executor tracks separately.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Lifecycle {
    Authenticating,
    Online,
    Dead,
    Respawning,
    LogoutPending,
}

struct PlayerAggregate {
    player_id: PlayerId,
    entity_id: EntityId,
    lifecycle: Lifecycle,
    position: Position,
    stats: Stats,
    version: u64,
    cooldowns: HashMap<u32, Instant>,
    last_combat_at: Option<Instant>,
}

impl PlayerAggregate {
    fn in_combat(&self, tag_window: Duration) -> bool {
        self.last_combat_at
            .is_some_and(|t| t.elapsed() < tag_window)
    }

    fn touch_combat(&mut self) {
        self.last_combat_at = Some(Instant::now());
    }
}

/// One command per mailbox message. `ApplyDamage`, `ApplyEffect`,
/// `PersistTick` and `Respawn` are never sent by the gateway directly:
/// `ApplyDamage`/`ApplyEffect` are routed mailbox-to-mailbox by
/// [`CastSkill`](PlayerCommand::CastSkill)'s handler, `PersistTick` by
/// the game node's flush loop, `Respawn` by the death timer this
/// executor schedules against itself.
pub enum PlayerCommand {
    Move {
        target: Position,
        client_ts: u64,
        reply: flume::Sender<MoveOutcome>,
    },
    CastSkill {
        skill_id: u32,
        target_entity_id: Option<EntityId>,
        reply: flume::Sender<CastSkillResult>,
    },
    ApplyDamage {
        amount: i64,
        source: EntityId,
    },
    ApplyEffect {
        modifier: String,
        magnitude: f32,
    },
    Logout {
        reply: flume::Sender<()>,
    },
    PersistTick,
    ShutdownHandoff {
        reply: flume::Sender<()>,
    },
    Respawn,
}

/// How long a dead player stays in `Dead` before `Respawn` fires and
/// returns them to `Online` at full health.
const RESPAWN_DELAY: Duration = Duration::from_secs(5);

pub struct MoveOutcome {
    pub accepted_position: PositionWire,
    pub anti_cheat_flags: AntiCheatFlags,
}

/// A handle the gateway-facing RPC dispatcher holds per online player;
/// cheap to clone, `Send`, and does no work itself beyond enqueueing.
#[derive(Clone)]
pub struct PlayerHandle {
    pub entity_id: EntityId,
    tx: Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn try_send(&self, command: PlayerCommand) -> Result<(), flume::TrySendError<PlayerCommand>> {
        self.tx.try_send(command)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{PlayerHandle, PlayerCommand};
    use flume::Sender;
    use gw_common::EntityId;

    pub fn handle_from_parts(entity_id: EntityId, tx: Sender<PlayerCommand>) -> PlayerHandle {
        PlayerHandle { entity_id, tx }
    }
}

/// Spawns the per-player executor task and returns the handle used to
/// reach it. `entity_id` doubles as the AOI key and is derived from
/// `player_id` 1:1 (see [`EntityId::from_player`]).
pub fn spawn_player_runtime(
    player_id: PlayerId,
    position: Position,
    stats: Stats,
    version: u64,
    aoi: Arc<AoiHub>,
    maps: Arc<MapTable>,
    persistence: Arc<PersistenceGateway>,
    skills: Arc<SkillTable>,
    movement: MovementConfig,
    combat: CombatConfig,
    mailbox_capacity: usize,
) -> PlayerHandle {
    let entity_id = EntityId::from_player(player_id);
    let (tx, rx) = flume::bounded(mailbox_capacity);

    aoi.set_defense(entity_id, stats.defense);

    let aggregate = PlayerAggregate {
        player_id,
        entity_id,
        lifecycle: Lifecycle::Online,
        position,
        stats,
        version,
        cooldowns: HashMap::new(),
        last_combat_at: None,
    };

    tokio::spawn(run_executor(
        aggregate,
        rx,
        tx.clone(),
        aoi,
        maps,
        persistence,
        skills,
        movement,
        combat,
    ));

    PlayerHandle { entity_id, tx }
}

async fn run_executor(
    mut aggregate: PlayerAggregate,
    rx: Receiver<PlayerCommand>,
    self_tx: Sender<PlayerCommand>,
    aoi: Arc<AoiHub>,
    maps: Arc<MapTable>,
    persistence: Arc<PersistenceGateway>,
    skills: Arc<SkillTable>,
    movement: MovementConfig,
    combat: CombatConfig,
) {
    aoi.enter(aggregate.player_id, aggregate.entity_id, aggregate.position);

    while let Ok(command) = rx.recv_async().await {
        match command {
            PlayerCommand::Move {
                target,
                client_ts: _,
                reply,
            } => {
                let outcome = handle_move(&mut aggregate, target, &movement, &maps, &aoi, &persistence);
                let _ = reply.send(outcome);
            }
            PlayerCommand::CastSkill {
                skill_id,
                target_entity_id,
                reply,
            } => {
                let result = handle_cast_skill(
                    &mut aggregate,
                    skill_id,
                    target_entity_id,
                    &skills,
                    &combat,
                    &aoi,
                );
                let _ = reply.send(result);
            }
            PlayerCommand::ApplyDamage { amount, source } => {
                if handle_apply_damage(&mut aggregate, amount, source, &aoi, &persistence) {
                    aggregate.lifecycle = Lifecycle::Respawning;
                    schedule_respawn(self_tx.clone());
                }
            }
            PlayerCommand::ApplyEffect { modifier, magnitude } => {
                handle_apply_effect(&mut aggregate, modifier, magnitude, &persistence);
                aoi.set_defense(aggregate.entity_id, aggregate.stats.defense);
            }
            PlayerCommand::Logout { reply } => {
                aggregate.lifecycle = Lifecycle::LogoutPending;
                aoi.leave(aggregate.entity_id);
                aoi.clear_defense(aggregate.entity_id);
                if let Err(err) = persistence.logout(aggregate.player_id) {
                    warn!(?err, player_id = %aggregate.player_id, "logout flush failed");
                }
                let _ = reply.send(());
                return;
            }
            PlayerCommand::PersistTick => {
                debug!(
                    player_id = %aggregate.player_id,
                    in_combat = aggregate.in_combat(combat.tag_window()),
                    "persist tick"
                );
                if let Err(err) = persistence.flush_one(aggregate.player_id) {
                    warn!(?err, player_id = %aggregate.player_id, "persist tick flush failed");
                }
            }
            PlayerCommand::ShutdownHandoff { reply } => {
                aoi.leave(aggregate.entity_id);
                aoi.clear_defense(aggregate.entity_id);
                let _ = reply.send(());
                return;
            }
            PlayerCommand::Respawn => {
                handle_respawn(&mut aggregate, &persistence);
            }
        }
    }

    debug!(player_id = %aggregate.player_id, "mailbox closed, executor exiting");
    aoi.leave(aggregate.entity_id);
    aoi.clear_defense(aggregate.entity_id);
}

fn handle_move(
    aggregate: &mut PlayerAggregate,
    mut target: Position,
    movement: &MovementConfig,
    maps: &MapTable,
    aoi: &AoiHub,
    persistence: &PersistenceGateway,
) -> MoveOutcome {
    let mut clamped = false;
    let distance = aggregate.position.planar_distance(&target);
    if distance > movement.max_move_per_tick {
        let ratio = movement.max_move_per_tick / distance;
        target.x = aggregate.position.x + (target.x - aggregate.position.x) * ratio;
        target.y = aggregate.position.y + (target.y - aggregate.position.y) * ratio;
        clamped = true;
    }

    let off_walkable_cell = !maps.is_walkable(target.map_id, target.x, target.y);
    if off_walkable_cell {
        // Reject the move outright rather than clamp into an obstacle:
        // there's no well-defined nearest walkable point on this table.
        return MoveOutcome {
            accepted_position: to_wire(aggregate.position),
            anti_cheat_flags: AntiCheatFlags {
                clamped_to_max_move: clamped,
                off_walkable_cell: true,
            },
        };
    }

    aggregate.position = target;
    aggregate.version += 1;
    debug!(player_id = %aggregate.player_id, version = aggregate.version, "position updated");

    let now = now_unix_ms();
    let _ = persistence.mutate(aggregate.player_id, now, |doc| {
        doc.position = target;
    });

    aoi.mv(aggregate.entity_id, target);

    MoveOutcome {
        accepted_position: to_wire(target),
        anti_cheat_flags: AntiCheatFlags {
            clamped_to_max_move: clamped,
            off_walkable_cell: false,
        },
    }
}

fn handle_cast_skill(
    aggregate: &mut PlayerAggregate,
    skill_id: u32,
    target_entity_id: Option<EntityId>,
    skills: &SkillTable,
    combat: &CombatConfig,
    aoi: &AoiHub,
) -> CastSkillResult {
    use gw_common::skill::SkillId;

    let Some(def) = skills.get(SkillId(skill_id)) else {
        return CastSkillResult {
            outcome: SkillCastOutcome::OutOfRange,
            damage: 0,
            crit: false,
            cooldown_until_ms: 0,
        };
    };

    if let Some(until) = aggregate.cooldowns.get(&skill_id) {
        if Instant::now() < *until {
            return CastSkillResult {
                outcome: SkillCastOutcome::OnCooldown,
                damage: 0,
                crit: false,
                cooldown_until_ms: 0,
            };
        }
    }

    if let Some(target) = target_entity_id {
        if let Some(target_position) = aoi.position_of(target) {
            if aggregate.position.planar_distance(&target_position) > def.range {
                return CastSkillResult {
                    outcome: SkillCastOutcome::OutOfRange,
                    damage: 0,
                    crit: false,
                    cooldown_until_ms: 0,
                };
            }
        }
    }

    let defense = target_entity_id.map(|t| aoi.defense_of(t)).unwrap_or(1).max(1);
    let mut damage = def.damage_base * aggregate.stats.attack / defense;
    let crit = rand::rng().random::<f32>() < combat.crit_chance;
    if crit {
        damage = ((damage as f32) * combat.crit_multiplier) as i64;
    }

    aggregate.touch_combat();
    let cooldown_until = Instant::now() + def.cooldown;
    aggregate.cooldowns.insert(skill_id, cooldown_until);

    if let Some(target) = target_entity_id {
        aoi.push_apply_damage(target, damage, aggregate.entity_id);
    }

    let observers = aoi.observers_of(aggregate.entity_id);
    if let Some(target) = target_entity_id {
        aoi.push_skill_result(aggregate.entity_id, Some(target), observers, damage, crit);
    } else {
        aoi.push_skill_result(aggregate.entity_id, None, observers, damage, crit);
    }

    CastSkillResult {
        outcome: SkillCastOutcome::Hit,
        damage,
        crit,
        cooldown_until_ms: 0,
    }
}

/// Applies damage to the target's own aggregate (sent mailbox-to-mailbox
/// from the caster's `CastSkill` handler). Returns `true` if this
/// brought the target to 0 hp, so the caller can schedule a respawn.
fn handle_apply_damage(
    aggregate: &mut PlayerAggregate,
    amount: i64,
    _source: EntityId,
    aoi: &AoiHub,
    persistence: &PersistenceGateway,
) -> bool {
    let died = aggregate.stats.apply_damage(amount);
    let now = now_unix_ms();
    let _ = persistence.mutate(aggregate.player_id, now, |doc| {
        doc.stats.hp_current = aggregate.stats.hp_current;
    });
    if died {
        aggregate.lifecycle = Lifecycle::Dead;
        aoi.push_death(aggregate.entity_id);
    }
    died
}

fn handle_apply_effect(
    aggregate: &mut PlayerAggregate,
    modifier: String,
    magnitude: f32,
    persistence: &PersistenceGateway,
) {
    aggregate.stats.modifiers.insert(modifier.clone(), magnitude);
    let now = now_unix_ms();
    let _ = persistence.mutate(aggregate.player_id, now, |doc| {
        doc.stats.modifiers.insert(modifier.clone(), magnitude);
    });
}

/// `Dead → Respawning → Online`: the `Respawning` half of that
/// transition is this delay itself, not a separately observable state.
fn handle_respawn(aggregate: &mut PlayerAggregate, persistence: &PersistenceGateway) {
    aggregate.stats.hp_current = aggregate.stats.hp_max;
    aggregate.lifecycle = Lifecycle::Online;
    let now = now_unix_ms();
    let _ = persistence.mutate(aggregate.player_id, now, |doc| {
        doc.stats.hp_current = aggregate.stats.hp_max;
    });
}

fn schedule_respawn(self_tx: Sender<PlayerCommand>) {
    tokio::spawn(async move {
        tokio::time::sleep(RESPAWN_DELAY).await;
        let _ = self_tx.send_async(PlayerCommand::Respawn).await;
    });
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

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::skill::{SkillDef, SkillId};
    use gw_persistence::{FlushPolicy, PersistenceGateway, PlayerDocument, StoreFactory};
    use std::time::Duration as StdDuration;

    fn test_aggregate(player_id: PlayerId) -> PlayerAggregate {
        PlayerAggregate {
            player_id,
            entity_id: EntityId::from_player(player_id),
            lifecycle: Lifecycle::Online,
            position: Position::new(1, 0.0, 0.0, 0.0, 0.0),
            stats: Stats::new_default(),
            version: 0,
            cooldowns: HashMap::new(),
            last_combat_at: None,
        }
    }

    fn test_persistence(player_id: PlayerId) -> PersistenceGateway {
        let store = StoreFactory::in_memory_only();
        store
            .save(
                &PlayerDocument::new_default(player_id, "t".into(), Position::new(1, 0.0, 0.0, 0.0, 0.0)),
                0,
            )
            .unwrap();
        let gw = PersistenceGateway::new(store, FlushPolicy::default());
        gw.login(player_id).unwrap();
        gw
    }

    #[test]
    fn move_beyond_bound_is_clamped_and_flagged() {
        let player_id = PlayerId::new();
        let mut aggregate = test_aggregate(player_id);
        let persistence = test_persistence(player_id);
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(player_id, aggregate.entity_id, aggregate.position);

        let movement = MovementConfig {
            max_move_per_tick: 5.0,
        };
        let maps = MapTable::empty();
        let outcome = handle_move(
            &mut aggregate,
            Position::new(1, 100.0, 0.0, 0.0, 0.0),
            &movement,
            &maps,
            &aoi,
            &persistence,
        );

        assert!(outcome.anti_cheat_flags.clamped_to_max_move);
        let dist = ((outcome.accepted_position.x).powi(2) + (outcome.accepted_position.y).powi(2)).sqrt();
        assert!((dist - 5.0).abs() < 0.01);
    }

    #[test]
    fn move_onto_a_blocked_cell_is_rejected() {
        let player_id = PlayerId::new();
        let mut aggregate = test_aggregate(player_id);
        let persistence = test_persistence(player_id);
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(player_id, aggregate.entity_id, aggregate.position);

        let movement = MovementConfig::default();
        let maps = MapTable::new(gw_common::config::MapConfig {
            cell_size: 10.0,
            blocked_cells: vec![gw_common::config::BlockedCell {
                map_id: 1,
                cell_x: 0,
                cell_y: 0,
            }],
        });
        let outcome = handle_move(
            &mut aggregate,
            Position::new(1, 5.0, 5.0, 0.0, 0.0),
            &movement,
            &maps,
            &aoi,
            &persistence,
        );

        assert!(outcome.anti_cheat_flags.off_walkable_cell);
        assert_eq!(aggregate.position, Position::new(1, 0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn cast_skill_uses_the_targets_snapshotted_defense() {
        let attacker = PlayerId::new();
        let target = PlayerId::new();
        let mut aggregate = test_aggregate(attacker);
        aggregate.stats.attack = 20;
        let mut skills = SkillTable::new();
        skills.insert(
            SkillId(1),
            SkillDef {
                damage_base: 100,
                crit_base: 0.0,
                cooldown: StdDuration::from_secs(1),
                range: 100.0,
            },
        );
        let combat = CombatConfig {
            crit_chance: 0.0,
            crit_multiplier: 1.5,
            tag_window_s: 5,
        };
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(attacker, aggregate.entity_id, aggregate.position);
        let target_entity = EntityId::from_player(target);
        aoi.enter(target, target_entity, aggregate.position);
        aoi.set_defense(target_entity, 10);

        let result = handle_cast_skill(&mut aggregate, 1, Some(target_entity), &skills, &combat, &aoi);
        assert_eq!(result.damage, 200);
    }

    #[test]
    fn cast_skill_on_cooldown_is_rejected() {
        let player_id = PlayerId::new();
        let mut aggregate = test_aggregate(player_id);
        aggregate.cooldowns.insert(1, Instant::now() + StdDuration::from_secs(10));
        let mut skills = SkillTable::new();
        skills.insert(
            SkillId(1),
            SkillDef {
                damage_base: 10,
                crit_base: 0.0,
                cooldown: StdDuration::from_secs(1),
                range: 10.0,
            },
        );
        let combat = CombatConfig::default();
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(player_id, aggregate.entity_id, aggregate.position);

        let result = handle_cast_skill(&mut aggregate, 1, None, &skills, &combat, &aoi);
        assert_eq!(result.outcome, SkillCastOutcome::OnCooldown);
    }

    #[test]
    fn cast_skill_unknown_skill_is_out_of_range() {
        let player_id = PlayerId::new();
        let mut aggregate = test_aggregate(player_id);
        let skills = SkillTable::new();
        let combat = CombatConfig::default();
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(player_id, aggregate.entity_id, aggregate.position);

        let result = handle_cast_skill(&mut aggregate, 999, None, &skills, &combat, &aoi);
        assert_eq!(result.outcome, SkillCastOutcome::OutOfRange);
    }

    #[test]
    fn apply_damage_to_zero_hp_marks_dead() {
        let player_id = PlayerId::new();
        let mut aggregate = test_aggregate(player_id);
        let persistence = test_persistence(player_id);
        let aoi = AoiHub::single_map(10.0, 1);
        aoi.enter(player_id, aggregate.entity_id, aggregate.position);

        handle_apply_damage(&mut aggregate, 10_000, EntityId::new(), &aoi, &persistence);
        assert_eq!(aggregate.lifecycle, Lifecycle::Dead);
        assert_eq!(aggregate.stats.hp_current, 0);
    }
}
