//! The game-node side of the gateway RPC contract (C5): implements
//! [`MessageHandler`], dispatching each inbound [`GatewayToGame`] call
//! to the addressed player's mailbox (spawning a runtime on first
//! login) and blocking the calling worker thread for the reply, within
//! the configured call deadline.

use std::sync::Arc;
use std::time::Duration;

use gw_common::config::{CombatConfig, MovementConfig};
use gw_common::{PlayerId, Position, SkillTable, Stats};
use gw_persistence::{PersistenceGateway, PlayerDocument};
use gw_rpc::transport::MessageHandler;
use gw_rpc::{GameToGateway, GatewayToGame, LoginResult, PositionWire, StatsWire};
use tracing::{info, warn};

use crate::aoi_hub::AoiHub;
use crate::directory::PlayerDirectory;
use crate::mapdata::MapTable;
use crate::runtime::{self, PlayerCommand};

pub struct GameHandler {
    directory: Arc<PlayerDirectory>,
    aoi: Arc<AoiHub>,
    maps: Arc<MapTable>,
    persistence: Arc<PersistenceGateway>,
    skills: Arc<SkillTable>,
    movement: MovementConfig,
    combat: CombatConfig,
    mailbox_capacity: usize,
    call_deadline: Duration,
}

impl GameHandler {
    pub fn new(
        directory: Arc<PlayerDirectory>,
        aoi: Arc<AoiHub>,
        maps: Arc<MapTable>,
        persistence: Arc<PersistenceGateway>,
        skills: Arc<SkillTable>,
        movement: MovementConfig,
        combat: CombatConfig,
        mailbox_capacity: usize,
        call_deadline: Duration,
    ) -> Self {
        Self {
            directory,
            aoi,
            maps,
            persistence,
            skills,
            movement,
            combat,
            mailbox_capacity,
            call_deadline,
        }
    }

    fn login(&self, player_id: PlayerId) -> GameToGateway {
        if self.directory.is_online(player_id) {
            warn!(%player_id, "duplicate login, force-logging-out the existing runtime");
            self.force_logout(player_id);
        }

        let doc = match self.persistence.login_or_create(player_id, || {
            PlayerDocument::new_default(player_id, player_id.to_string(), Position::new(1, 0.0, 0.0, 0.0, 0.0))
        }) {
            Ok(doc) => doc,
            Err(err) => return GameToGateway::LoginResult(Err(err.to_string())),
        };

        let handle = runtime::spawn_player_runtime(
            player_id,
            doc.position,
            doc.stats.clone(),
            doc.version,
            Arc::clone(&self.aoi),
            Arc::clone(&self.maps),
            Arc::clone(&self.persistence),
            Arc::clone(&self.skills),
            self.movement.clone(),
            self.combat.clone(),
            self.mailbox_capacity,
        );
        self.directory.insert(player_id, handle);

        info!(%player_id, "player logged in");
        GameToGateway::LoginResult(Ok(LoginResult {
            initial_position: to_wire(doc.position),
            initial_stats: to_stats_wire(&doc.stats),
            map_id: doc.position.map_id,
        }))
    }

    /// Synchronously tears down an existing runtime: send Logout, wait
    /// for its ack, then drop the directory entry. Used both for the
    /// client-initiated Logout RPC and to evict a stale session on
    /// duplicate login.
    fn force_logout(&self, player_id: PlayerId) {
        if let Some(handle) = self.directory.handle_of(player_id) {
            let (tx, rx) = flume::bounded(1);
            if handle.try_send(PlayerCommand::Logout { reply: tx }).is_ok() {
                let _ = rx.recv_timeout(self.call_deadline);
            }
        }
        self.directory.remove(player_id);
    }

    fn logout(&self, player_id: PlayerId) -> GameToGateway {
        if !self.directory.is_online(player_id) {
            // Idempotent: a second Logout for an already-offline player is a no-op Ack.
            return GameToGateway::LogoutAck;
        }
        self.force_logout(player_id);
        GameToGateway::LogoutAck
    }

    fn mv(&self, player_id: PlayerId, target_position: PositionWire, client_ts: u64) -> GameToGateway {
        let Some(handle) = self.directory.handle_of(player_id) else {
            return GameToGateway::Error("player not online on this node".to_string());
        };
        let (tx, rx) = flume::bounded(1);
        let command = PlayerCommand::Move {
            target: from_wire(target_position),
            client_ts,
            reply: tx,
        };
        if handle.try_send(command).is_err() {
            return GameToGateway::Error("player mailbox full".to_string());
        }
        match rx.recv_timeout(self.call_deadline) {
            Ok(outcome) => GameToGateway::MoveResult {
                accepted_position: outcome.accepted_position,
                anti_cheat_flags: outcome.anti_cheat_flags,
            },
            Err(_) => GameToGateway::Error("timeout".to_string()),
        }
    }

    fn cast_skill(
        &self,
        player_id: PlayerId,
        skill_id: u32,
        target_entity_id: Option<gw_common::EntityId>,
    ) -> GameToGateway {
        let Some(handle) = self.directory.handle_of(player_id) else {
            return GameToGateway::Error("player not online on this node".to_string());
        };
        let (tx, rx) = flume::bounded(1);
        let command = PlayerCommand::CastSkill {
            skill_id,
            target_entity_id,
            reply: tx,
        };
        if handle.try_send(command).is_err() {
            return GameToGateway::Error("player mailbox full".to_string());
        }
        match rx.recv_timeout(self.call_deadline) {
            Ok(result) => GameToGateway::CastSkillResult(result),
            Err(_) => GameToGateway::Error("timeout".to_string()),
        }
    }
}

impl MessageHandler for GameHandler {
    fn handle(&self, _player_id: PlayerId, message: GatewayToGame) -> GameToGateway {
        match message {
            GatewayToGame::Login { player_id, .. } => self.login(player_id),
            GatewayToGame::Logout { player_id, .. } => self.logout(player_id),
            GatewayToGame::Move {
                player_id,
                target_position,
                client_ts,
            } => self.mv(player_id, target_position, client_ts),
            GatewayToGame::CastSkill {
                player_id,
                skill_id,
                target_entity_id,
            } => self.cast_skill(player_id, skill_id, target_entity_id),
            GatewayToGame::GenericMessage { payload, .. } => GameToGateway::GenericReply(payload),
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

fn from_wire(position: PositionWire) -> Position {
    Position::new(position.map_id, position.x, position.y, position.z, position.facing)
}

fn to_stats_wire(stats: &Stats) -> StatsWire {
    StatsWire {
        level: stats.level,
        exp: stats.exp,
        hp_current: stats.hp_current,
        hp_max: stats.hp_max,
        attack: stats.attack,
        defense: stats.defense,
        speed: stats.speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::config::AoiConfig;
    use gw_persistence::{FlushPolicy, StoreFactory};

    fn test_handler() -> GameHandler {
        let store = StoreFactory::in_memory_only();
        let persistence = Arc::new(PersistenceGateway::new(store, FlushPolicy::default()));
        let directory = Arc::new(PlayerDirectory::new());
        let aoi = AoiHub::single_map(10.0, 1);
        GameHandler::new(
            directory,
            aoi,
            Arc::new(crate::mapdata::MapTable::empty()),
            persistence,
            Arc::new(SkillTable::new()),
            MovementConfig::default(),
            CombatConfig::default(),
            16,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn login_on_a_brand_new_player_materializes_defaults() {
        let handler = test_handler();
        let player_id = PlayerId::new();
        let reply = handler.handle(
            player_id,
            GatewayToGame::Login {
                player_id,
                token: gw_rpc::tokens::SessionToken("tok".to_string()),
                session_meta: gw_rpc::SessionMeta {
                    remote_addr: "127.0.0.1:1".to_string(),
                    gateway_id: "gw-1".to_string(),
                },
            },
        );
        match reply {
            GameToGateway::LoginResult(Ok(result)) => assert_eq!(result.initial_stats.level, 1),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn logout_for_an_offline_player_is_an_idempotent_ack() {
        let handler = test_handler();
        let reply = handler.handle(
            PlayerId::new(),
            GatewayToGame::Logout {
                player_id: PlayerId::new(),
                reason: gw_rpc::LogoutReason::ClientRequest,
            },
        );
        assert!(matches!(reply, GameToGateway::LogoutAck));
    }

    #[test]
    fn move_for_a_player_not_online_here_is_an_error() {
        let handler = test_handler();
        let reply = handler.handle(
            PlayerId::new(),
            GatewayToGame::Move {
                player_id: PlayerId::new(),
                target_position: PositionWire {
                    map_id: 1,
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    facing: 0.0,
                },
                client_ts: 0,
            },
        );
        assert!(matches!(reply, GameToGateway::Error(_)));
    }
}
