//! Layered configuration: built-in defaults, overridden by an optional
//! YAML file, overridden by `GW_`-prefixed environment variables.
//!
//! Binaries additionally expose a `clap`-derived `Args` struct for
//! process-level overrides (listen address, config path, verbosity) and
//! merge those onto the loaded [`Config`] the same way each sub-section
//! below merges onto its own defaults.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TcpConfig {
    pub port: u16,
    pub max_connections: usize,
    pub buffer_size: usize,
    /// Fixed capacity of a session's outbound write queue before it is
    /// marked slow.
    pub outbound_queue_capacity: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            max_connections: 10_000,
            buffer_size: 4096,
            outbound_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout_s: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_s: 5 }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_s: u64,
    pub timeout_s: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_s: 10,
            timeout_s: 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    /// Request/reply (ROUTER/DEALER) endpoints of the live game nodes,
    /// one per node; the session router picks among these by consistent
    /// hash of the player id.
    pub game_nodes: Vec<String>,
    /// Events (PUB/SUB) endpoint, one per entry in `game_nodes`, same order.
    pub game_event_nodes: Vec<String>,
    pub deadline_ms: u64,
    pub num_workers: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            game_nodes: vec!["tcp://127.0.0.1:8081".to_string()],
            game_event_nodes: vec!["tcp://127.0.0.1:8082".to_string()],
            deadline_ms: 3000,
            num_workers: 4,
        }
    }
}

impl RpcConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub verify_url: String,
    pub token_cache_ttl_s: u64,
    /// Exponential backoff schedule for `AuthServiceUnreachable`, in
    /// milliseconds.
    pub retry_backoff_ms: Vec<u64>,
    /// Base64-encoded symmetric key used to mint and verify
    /// gateway-issued session tokens carried on the game-node RPC.
    pub session_key_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verify_url: "http://127.0.0.1:8080/api/v1/auth/verify".to_string(),
            token_cache_ttl_s: 30,
            retry_backoff_ms: vec![100, 300, 900],
            session_key_path: "./keys/gw_session.key".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn token_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub addr: String,
    pub password: Option<String>,
    pub db: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "./data/player-store".to_string(),
            database: "players".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub flush_interval_s: u64,
    pub flush_threshold: usize,
    pub disconnect_grace_s: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_s: 5,
            flush_threshold: 32,
            disconnect_grace_s: 30,
        }
    }
}

impl PersistenceConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_s)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AoiConfig {
    pub cell_size: f32,
    pub neighborhood: i64,
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            neighborhood: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MovementConfig {
    /// Anti-teleport bound: the farthest a player may move in one tick
    /// before the target is clamped and the move flagged anti-cheat.
    pub max_move_per_tick: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_move_per_tick: 8.0,
        }
    }
}

/// One impassable grid cell on a map, named the same way `gw_aoi::Grid`
/// cells are: `floor(coord / cell_size)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlockedCell {
    pub map_id: u32,
    pub cell_x: i32,
    pub cell_y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    /// Cell size used to bucket `blocked_cells`, independent of the AOI
    /// grid's own cell size.
    pub cell_size: f32,
    /// Cells a move target may never land on. Empty by default -- maps
    /// with no configured obstacles are entirely walkable.
    pub blocked_cells: Vec<BlockedCell>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            blocked_cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CombatConfig {
    pub crit_chance: f32,
    pub crit_multiplier: f32,
    pub tag_window_s: u64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            crit_chance: 0.10,
            crit_multiplier: 1.5,
            tag_window_s: 5,
        }
    }
}

impl CombatConfig {
    pub fn tag_window(&self) -> Duration {
        Duration::from_secs(self.tag_window_s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub persistence: PersistenceConfig,
    pub aoi: AoiConfig,
    pub combat: CombatConfig,
    pub movement: MovementConfig,
    pub maps: MapConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub tcp: TcpConfig,
    pub heartbeat: HeartbeatConfig,
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load defaults, then layer an optional YAML file, then environment
    /// variables prefixed `GW_` (double-underscore nested, e.g.
    /// `GW_SERVER__TCP__PORT`).
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("GW_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.tcp.port, 9090);
        assert_eq!(cfg.server.heartbeat.timeout_s, 60);
        assert_eq!(cfg.persistence.flush_threshold, 32);
        assert_eq!(cfg.aoi.neighborhood, 1);
        assert_eq!(cfg.combat.crit_chance, 0.10);
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let cfg = Config::load(None).expect("defaults must extract cleanly");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, "server:\n  tcp:\n    port: 12345\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.server.tcp.port, 12345);
        assert_eq!(cfg.server.tcp.max_connections, 10_000);
    }
}
