//! ZeroMQ transport for the gateway<->game-node RPC contract: a
//! ROUTER/DEALER request-reply proxy fanning out to a worker-thread pool
//! for [`GatewayToGame`] calls, and a separate PUB/SUB channel — topic-
//! keyed by `PlayerId` — for [`GameToGateway`] pushes and broadcasts.
//! This control-plane/event-plane split mirrors the reference daemon's
//! RPC transport so request backpressure never blocks push delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bincode::config::standard;
use gw_common::PlayerId;
use tracing::{debug, error, info, warn};

use crate::messages::{ClientEvent, GameToGateway, GatewayToGame, HostBroadcastEvent};

/// Well-known topic prefix for host-wide broadcasts on the events PUB socket.
pub const HOST_BROADCAST_TOPIC: &[u8] = b"__host_broadcast__";

/// Business logic invoked by each RPC worker thread for an inbound
/// [`GatewayToGame`] call. Implementations must not block beyond the
/// call's deadline; long-running work should itself enforce a timeout.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, player_id: PlayerId, message: GatewayToGame) -> GameToGateway;
}

/// A single wire envelope carried over the ROUTER/DEALER plane.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct RpcEnvelope {
    player_id: PlayerId,
    message: GatewayToGame,
}

/// The game-node side of the RPC transport: owns the ROUTER-facing proxy
/// and the PUB socket used for pushes/broadcasts.
pub struct RpcTransport {
    zmq_context: zmq::Context,
    kill_switch: Arc<AtomicBool>,
    events_publish: Arc<Mutex<zmq::Socket>>,
}

impl RpcTransport {
    pub fn new(
        zmq_context: zmq::Context,
        events_endpoint: &str,
        kill_switch: Arc<AtomicBool>,
    ) -> eyre::Result<Self> {
        let events_publish = zmq_context.socket(zmq::PUB)?;
        events_publish.bind(events_endpoint)?;
        Ok(Self {
            zmq_context,
            kill_switch,
            events_publish: Arc::new(Mutex::new(events_publish)),
        })
    }

    /// Bind the ROUTER endpoint, spawn `num_workers` worker threads behind
    /// an internal DEALER via `zmq::proxy_steerable`, and block the caller
    /// (intended to be run in its own OS thread or `spawn_blocking` task)
    /// until the kill switch is observed.
    pub fn start_request_loop(
        &self,
        rpc_endpoint: &str,
        num_workers: usize,
        handler: Arc<dyn MessageHandler>,
    ) -> eyre::Result<()> {
        let mut clients = self.zmq_context.socket(zmq::ROUTER)?;
        clients.bind(rpc_endpoint)?;
        let mut workers = self.zmq_context.socket(zmq::DEALER)?;
        workers.bind("inproc://rpc-workers")?;

        let mut worker_handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers.max(1) {
            let ctx = self.zmq_context.clone();
            let handler = Arc::clone(&handler);
            worker_handles.push(thread::spawn(move || {
                if let Err(err) = rpc_process_loop(ctx, worker_id, handler) {
                    error!(worker_id, %err, "rpc worker thread exited with error");
                }
            }));
        }

        let mut control = self.zmq_context.socket(zmq::PAIR)?;
        control.bind("inproc://rpc-control")?;
        let control_connect_ctx = self.zmq_context.clone();
        let kill_switch = Arc::clone(&self.kill_switch);
        let proxy_thread = thread::spawn(move || {
            let control_peer = control_connect_ctx
                .socket(zmq::PAIR)
                .expect("control socket");
            control_peer
                .connect("inproc://rpc-control")
                .expect("control connect");
            if let Err(err) = zmq::proxy_steerable(&mut clients, &mut workers, &mut control_peer) {
                error!(%err, "rpc proxy exited with error");
            }
        });

        while !kill_switch.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(10));
        }
        control.send("TERMINATE", 0)?;
        let _ = proxy_thread.join();
        for handle in worker_handles {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Push an event to a single player's current gateway, addressed by
    /// the player's id as the PUB topic.
    pub fn push_to_player(&self, player_id: PlayerId, event: ClientEvent) -> eyre::Result<()> {
        let topic = bincode::encode_to_vec(player_id, standard())?;
        let body = bincode::encode_to_vec(&event, standard())?;
        let publish = self.events_publish.lock().unwrap();
        publish.send_multipart([topic, body], 0)?;
        Ok(())
    }

    /// Push the same event to many players at once (AOI broadcast
    /// fan-out). Each recipient still gets its own PUB frame so gateways
    /// subscribed to only some topics aren't woken for everyone.
    pub fn push_to_many(&self, recipients: &[PlayerId], event: ClientEvent) -> eyre::Result<usize> {
        let body = bincode::encode_to_vec(&event, standard())?;
        let publish = self.events_publish.lock().unwrap();
        let mut acked = 0;
        for player_id in recipients {
            let topic = bincode::encode_to_vec(player_id, standard())?;
            publish.send_multipart([topic, body.clone()], 0)?;
            acked += 1;
        }
        Ok(acked)
    }

    pub fn broadcast_host_event(&self, event: HostBroadcastEvent) -> eyre::Result<()> {
        let body = bincode::encode_to_vec(&event, standard())?;
        let publish = self.events_publish.lock().unwrap();
        publish.send_multipart([HOST_BROADCAST_TOPIC.to_vec(), body], 0)?;
        Ok(())
    }
}

fn rpc_process_loop(
    ctx: zmq::Context,
    worker_id: usize,
    handler: Arc<dyn MessageHandler>,
) -> eyre::Result<()> {
    let worker_socket = ctx.socket(zmq::REP)?;
    worker_socket.connect("inproc://rpc-workers")?;
    debug!(worker_id, "rpc worker started");

    loop {
        let mut poll_items = [worker_socket.as_poll_item(zmq::POLLIN)];
        let rc = zmq::poll(&mut poll_items, 100)?;
        if rc == 0 {
            continue;
        }
        if !poll_items[0].is_readable() {
            continue;
        }
        let parts = match worker_socket.recv_multipart(0) {
            Ok(p) => p,
            Err(err) => {
                warn!(worker_id, %err, "failed to receive rpc request");
                continue;
            }
        };
        let Some(body) = parts.into_iter().next_back() else {
            warn!(worker_id, "empty rpc request");
            continue;
        };
        let reply = match bincode::decode_from_slice::<RpcEnvelope, _>(&body, standard()) {
            Ok((envelope, _)) => handler.handle(envelope.player_id, envelope.message),
            Err(err) => GameToGateway::Error(format!("malformed request: {err}")),
        };
        let reply_bytes = bincode::encode_to_vec(&reply, standard())?;
        worker_socket.send(reply_bytes, 0)?;
    }
}

/// Encode a [`GatewayToGame`] call into the wire envelope the transport expects.
pub fn encode_request(player_id: PlayerId, message: GatewayToGame) -> eyre::Result<Vec<u8>> {
    let envelope = RpcEnvelope { player_id, message };
    Ok(bincode::encode_to_vec(&envelope, standard())?)
}

pub fn decode_reply(bytes: &[u8]) -> eyre::Result<GameToGateway> {
    let (reply, _) = bincode::decode_from_slice(bytes, standard())?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_round_trips() {
        let player_id = PlayerId::new();
        let msg = GatewayToGame::Logout {
            player_id,
            reason: crate::messages::LogoutReason::ClientRequest,
        };
        let bytes = encode_request(player_id, msg.clone()).unwrap();
        let (decoded, _): (RpcEnvelope, usize) =
            bincode::decode_from_slice(&bytes, standard()).unwrap();
        assert_eq!(decoded.player_id, player_id);
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn reply_round_trips() {
        let reply = GameToGateway::LogoutAck;
        let bytes = bincode::encode_to_vec(&reply, standard()).unwrap();
        let decoded = decode_reply(&bytes).unwrap();
        assert_eq!(decoded, reply);
    }
}
