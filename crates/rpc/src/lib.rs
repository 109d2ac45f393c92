//! Gateway<->game-node RPC: signed tokens, the typed message contract,
//! and the ZMQ ROUTER/DEALER + PUB/SUB transport that carries them.

pub mod client;
pub mod messages;
pub mod tokens;
pub mod transport;

pub use messages::{
    AntiCheatFlags, CastSkillResult, ClientEvent, GameToGateway, GatewayToGame, HostBroadcastEvent,
    LoginResult, LogoutReason, PositionWire, PushToMany, SessionMeta, SkillCastOutcome, StatsWire,
};
pub use tokens::{KeyError, NodeToken, SessionToken};
pub use transport::{MessageHandler, RpcTransport};
