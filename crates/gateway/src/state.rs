//! Wires the per-process pieces (session table, node assignment, auth
//! client, RPC clients) into one shared handle passed to every
//! connection task.

use std::sync::Arc;
use std::time::Duration;

use gw_common::config::Config;
use gw_common::PlayerId;
use gw_rpc::client::{EventSubscriber, RpcClient};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::auth::TokenVerifier;
use crate::node_registry::{NodeEndpoint, NodeRegistry};
use crate::push::{self, SubscribeCmd};
use crate::registry::SessionRegistry;

/// Everything a connection task needs to route and forward a player's
/// traffic: the session table, which node owns which player, and a
/// shared RPC client per node (request/reply calls are serialized
/// behind a `Mutex` since `tmq`'s `Dealer` needs `&mut self` per call,
/// matching a single in-flight request per node at a time from this
/// gateway process).
pub struct GatewayState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub nodes: NodeRegistry,
    pub auth: TokenVerifier,
    rpc_clients: Vec<Mutex<RpcClient>>,
    subscribe_senders: Vec<mpsc::Sender<SubscribeCmd>>,
}

impl GatewayState {
    pub async fn connect(config: Config, zmq_ctx: &tmq::Context) -> eyre::Result<Arc<Self>> {
        let registry = Arc::new(SessionRegistry::new());
        let mut endpoints = Vec::new();
        let mut rpc_clients = Vec::new();
        let mut subscribe_senders = Vec::new();

        for (rpc_addr, events_addr) in config
            .rpc
            .game_nodes
            .iter()
            .zip(config.rpc.game_event_nodes.iter())
        {
            endpoints.push(NodeEndpoint {
                rpc_addr: rpc_addr.clone(),
                events_addr: events_addr.clone(),
            });

            let client = RpcClient::connect(zmq_ctx, rpc_addr, Duration::from_millis(config.rpc.deadline_ms))?;
            rpc_clients.push(Mutex::new(client));

            let subscriber = EventSubscriber::connect(zmq_ctx, events_addr)?;
            let (tx, rx) = mpsc::channel(64);
            subscribe_senders.push(tx);
            let registry = Arc::clone(&registry);
            tokio::spawn(push::run_event_loop(subscriber, rx, registry));
        }

        let nodes = NodeRegistry::new(endpoints);
        let auth = TokenVerifier::new(
            config.auth.verify_url.clone(),
            config.auth.token_cache_ttl(),
            &config.auth.retry_backoff_ms,
        );

        info!(node_count = nodes.len(), "gateway state connected to game nodes");

        Ok(Arc::new(Self {
            config,
            registry,
            nodes,
            auth,
            rpc_clients,
            subscribe_senders,
        }))
    }

    pub async fn call(
        &self,
        node_index: usize,
        player_id: PlayerId,
        message: gw_rpc::GatewayToGame,
    ) -> Result<gw_rpc::GameToGateway, gw_rpc::client::RpcClientError> {
        let mut client = self.rpc_clients[node_index].lock().await;
        let result = client.call(player_id, message).await;
        match &result {
            Ok(_) => self.nodes.mark_healthy(node_index),
            Err(gw_rpc::client::RpcClientError::Timeout | gw_rpc::client::RpcClientError::Transport(_)) => {
                self.nodes.mark_unhealthy(node_index);
            }
            Err(_) => {}
        }
        result
    }

    /// Probe every node with a zero-payload `GenericMessage` ping. A node
    /// that fails to reply within deadline is marked unhealthy (via
    /// `call`'s own bookkeeping above) and skipped for new assignments
    /// until a later probe succeeds again.
    pub async fn health_check_all_nodes(&self) {
        for node_index in 0..self.nodes.len() {
            let ping = gw_rpc::GatewayToGame::GenericMessage {
                player_id: PlayerId::new(),
                msg_type: 0,
                payload: Vec::new(),
            };
            let _ = self.call(node_index, PlayerId::new(), ping).await;
        }
    }

    pub async fn subscribe_push(&self, node_index: usize, player_id: PlayerId) {
        let _ = self.subscribe_senders[node_index]
            .send(SubscribeCmd::Subscribe(player_id))
            .await;
    }

    pub async fn unsubscribe_push(&self, node_index: usize, player_id: PlayerId) {
        let _ = self.subscribe_senders[node_index]
            .send(SubscribeCmd::Unsubscribe(player_id))
            .await;
    }
}
