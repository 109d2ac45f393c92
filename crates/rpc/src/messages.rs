//! Typed RPC messages exchanged between a gateway and a game node.
//! `GatewayToGame` carries the request methods the gateway initiates;
//! `GameToGateway` carries the replies. `ClientsBroadcastEvent` and
//! `ClientEvent` are pushed by the game node over the PUB/SUB plane,
//! independent of the request/reply plane, addressed by `PlayerId` topic.

use bincode::{Decode, Encode};
use gw_common::{EntityId, NodeId, PlayerId};
use std::time::SystemTime;

use crate::tokens::SessionToken;

/// Opaque metadata about the session attempting to log in, forwarded to
/// the game node so it can populate connection-scoped fields without the
/// game node needing to know about gateway/transport internals.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SessionMeta {
    pub remote_addr: String,
    pub gateway_id: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Encode, Decode)]
pub enum LogoutReason {
    ClientRequest,
    HeartbeatLost,
    Backpressure,
    DuplicateLogin,
    GatewayShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct PositionWire {
    pub map_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub facing: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct StatsWire {
    pub level: u32,
    pub exp: u64,
    pub hp_current: i64,
    pub hp_max: i64,
    pub attack: i64,
    pub defense: i64,
    pub speed: f32,
}

/// A request the gateway sends to the game node that owns a player,
/// keyed by the fixed method set of the game-node RPC contract.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum GatewayToGame {
    Login {
        player_id: PlayerId,
        token: SessionToken,
        session_meta: SessionMeta,
    },
    /// Idempotent: a second `Logout` for an already-offline player is a no-op `Ack`.
    Logout {
        player_id: PlayerId,
        reason: LogoutReason,
    },
    Move {
        player_id: PlayerId,
        target_position: PositionWire,
        client_ts: u64,
    },
    CastSkill {
        player_id: PlayerId,
        skill_id: u32,
        target_entity_id: Option<EntityId>,
    },
    /// Fallback for content modules that haven't been promoted to a
    /// first-class method: raw msg_type + payload bytes, round-tripped
    /// opaquely by the game node's generic dispatch table.
    GenericMessage {
        player_id: PlayerId,
        msg_type: u16,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Encode, Decode)]
pub struct AntiCheatFlags {
    pub clamped_to_max_move: bool,
    pub off_walkable_cell: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Encode, Decode)]
pub enum SkillCastOutcome {
    Hit,
    Miss,
    OnCooldown,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LoginResult {
    pub initial_position: PositionWire,
    pub initial_stats: StatsWire,
    pub map_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct CastSkillResult {
    pub outcome: SkillCastOutcome,
    pub damage: i64,
    pub crit: bool,
    pub cooldown_until_ms: u64,
}

/// The reply the game node sends back for a given [`GatewayToGame`] call.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum GameToGateway {
    LoginResult(Result<LoginResult, String>),
    LogoutAck,
    MoveResult {
        accepted_position: PositionWire,
        anti_cheat_flags: AntiCheatFlags,
    },
    CastSkillResult(CastSkillResult),
    GenericReply(Vec<u8>),
    /// The call could not be completed before its deadline on the game
    /// node's side (e.g. a downstream persistence call timed out).
    Error(String),
}

/// Events the game node pushes to a specific player's current gateway,
/// outside the request/reply cycle (AOI deltas, forced disconnects).
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ClientEvent {
    EntityEnter {
        entity_id: EntityId,
        position: PositionWire,
    },
    EntityLeave {
        entity_id: EntityId,
    },
    PositionUpdate {
        entity_id: EntityId,
        position: PositionWire,
    },
    SkillResult {
        caster: EntityId,
        target: Option<EntityId>,
        result: CastSkillResult,
    },
    SystemMessage(String),
    ForceDisconnect {
        reason: LogoutReason,
    },
}

/// Events broadcast to many players at once, used by `PushToMany` / AOI
/// fan-out. Carries the explicit recipient set so the transport can
/// address each subscriber's PUB topic individually.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct PushToMany {
    pub recipients: Vec<PlayerId>,
    pub event: ClientEvent,
}

/// Host-wide events unrelated to any single player (node health, clock sync).
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub enum HostBroadcastEvent {
    PingPong {
        server_time_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct NodeHandshake {
    pub node_id: NodeWire,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct NodeWire(pub String);

impl From<NodeId> for NodeWire {
    fn from(id: NodeId) -> Self {
        NodeWire(id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode, Eq, Hash)]
pub struct SystemTimeWire {
    pub unix_millis: u64,
}

impl From<SystemTime> for SystemTimeWire {
    fn from(t: SystemTime) -> Self {
        let unix_millis = t
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        SystemTimeWire { unix_millis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::config::standard;

    #[test]
    fn gateway_to_game_login_round_trips_through_bincode() {
        let msg = GatewayToGame::Login {
            player_id: PlayerId::new(),
            token: SessionToken("tok".to_string()),
            session_meta: SessionMeta {
                remote_addr: "127.0.0.1:1234".to_string(),
                gateway_id: "gw-1".to_string(),
            },
        };
        let encoded = bincode::encode_to_vec(&msg, standard()).unwrap();
        let (decoded, _): (GatewayToGame, usize) =
            bincode::decode_from_slice(&encoded, standard()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn client_event_position_update_round_trips() {
        let event = ClientEvent::PositionUpdate {
            entity_id: EntityId::new(),
            position: PositionWire {
                map_id: 1,
                x: 10.0,
                y: 20.0,
                z: 0.0,
                facing: 0.0,
            },
        };
        let encoded = bincode::encode_to_vec(&event, standard()).unwrap();
        let (decoded, _): (ClientEvent, usize) =
            bincode::decode_from_slice(&encoded, standard()).unwrap();
        assert_eq!(decoded, event);
    }
}
