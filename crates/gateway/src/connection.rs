//! Per-connection reader and writer tasks. Grounded on the reference
//! host's `TcpConnection::run` shape -- a `select!` loop reading frames
//! off the socket and acting on them -- generalized from a line-based
//! MOO command loop to this protocol's framed binary messages plus a
//! separate writer task draining the session's outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gw_common::{PlayerId, SessionId};
use gw_rpc::{GatewayToGame, LoginResult, LogoutReason, SessionMeta};
use gw_wire::{msg_type, Frame, FrameCodec};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::registry::SessionRegistry;
use crate::router::{self, RouteOutcome};
use crate::session::{AuthState, Outbound, PushOutcome, Session};
use crate::state::GatewayState;

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn force_disconnect_frame() -> Frame {
    Frame::new(msg_type::MSG_FORCE_DISCONNECT, 0, now_unix_ms(), 0, Bytes::new())
}

/// Accepted connections are handed straight to this task; it owns the
/// socket for the lifetime of the session.
pub async fn handle_connection(state: Arc<GatewayState>, socket: TcpStream, peer_addr: SocketAddr) {
    let session_id = SessionId::new();
    let span = info_span!("session", %session_id, %peer_addr);
    async move {
        let strict_sequencing = true;
        let framed = Framed::new(socket, FrameCodec::new(strict_sequencing));
        let (mut writer, mut reader) = framed.split();

        let queue_capacity = state.config.server.tcp.outbound_queue_capacity;
        let session = Arc::new(Session::new(session_id, queue_capacity));
        state.registry.insert(session.clone());

        let mut bound_node: Option<usize> = None;
        let mut current_player: Option<PlayerId> = None;
        let mut close_reason: Option<LogoutReason> = None;

        'session: loop {
            tokio::select! {
                outgoing = session.queue.recv() => {
                    let Some(outbound) = outgoing else {
                        break;
                    };
                    let reason = outbound.close_reason();
                    if let Err(err) = writer.send(outbound.frame().clone()).await {
                        warn!(%err, "write failed, closing session");
                        break;
                    }
                    if let Some(reason) = reason {
                        close_reason = Some(reason);
                        break 'session;
                    }
                }
                incoming = reader.next() => {
                    let Some(incoming) = incoming else {
                        debug!("connection closed by peer");
                        break;
                    };
                    let frame = match incoming {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(%err, "codec error, closing session");
                            break;
                        }
                    };
                    state.registry.heartbeat_touch(session_id);

                    let auth_state = current_player
                        .map(AuthState::Authenticated)
                        .unwrap_or(AuthState::Anonymous);

                    match router::route(session_id, auth_state, &frame) {
                        RouteOutcome::HeartbeatAck => {
                            let reply = Frame::new(msg_type::MSG_HEARTBEAT, 0, now_unix_ms(), frame.sequence, Bytes::new());
                            let _ = writer.send(reply).await;
                        }
                        RouteOutcome::AuthRequired => {
                            let reply = Frame::new(msg_type::MSG_ERROR, 0, now_unix_ms(), frame.sequence, Bytes::from_static(b"auth required"));
                            let _ = writer.send(reply).await;
                        }
                        RouteOutcome::BeginLogin { payload } => {
                            match perform_login(&state, session_id, peer_addr, payload).await {
                                Ok((player_id, node_index)) => {
                                    current_player = Some(player_id);
                                    bound_node = Some(node_index);
                                    if let Some(stale) = state.registry.bind_player(session_id, player_id) {
                                        warn!(%stale, "duplicate login, closing prior session");
                                        state.registry.send_to_session(
                                            stale,
                                            Outbound::Close(force_disconnect_frame(), LogoutReason::DuplicateLogin),
                                        );
                                    }
                                    state.subscribe_push(node_index, player_id).await;
                                    let reply = Frame::new(msg_type::MSG_PLAYER_LOGIN, 0, now_unix_ms(), frame.sequence, Bytes::new());
                                    let _ = writer.send(reply).await;
                                }
                                Err(err) => {
                                    warn!(%err, "login failed");
                                    let reply = Frame::new(msg_type::MSG_ERROR, 0, now_unix_ms(), frame.sequence, Bytes::from(err.to_string().into_bytes()));
                                    let _ = writer.send(reply).await;
                                }
                            }
                        }
                        RouteOutcome::Forward { player_id, message } => {
                            let Some(node_index) = bound_node else {
                                warn!("forward requested with no bound node");
                                continue;
                            };
                            match state.call(node_index, player_id, message).await {
                                Ok(reply) => {
                                    let payload = bincode::encode_to_vec(&reply, bincode::config::standard()).unwrap_or_default();
                                    let frame = Frame::new(frame.msg_type, 0, now_unix_ms(), frame.sequence, Bytes::from(payload));
                                    let _ = writer.send(frame).await;
                                }
                                Err(err) => {
                                    warn!(%err, "rpc call to game node failed");
                                    let reply = Frame::new(msg_type::MSG_ERROR, 0, now_unix_ms(), frame.sequence, Bytes::from_static(b"timeout"));
                                    let _ = writer.send(reply).await;
                                }
                            }
                        }
                    }
                }
            }
        }

        if let (Some(player_id), Some(node_index)) = (current_player, bound_node) {
            let reason = close_reason.unwrap_or(LogoutReason::ClientRequest);
            let _ = state
                .call(node_index, player_id, GatewayToGame::Logout { player_id, reason })
                .await;
            state.unsubscribe_push(node_index, player_id).await;
        }
        state.registry.remove(session_id);
        info!(?close_reason, "session closed");
    }
    .instrument(span)
    .await;
}

async fn perform_login(
    state: &GatewayState,
    _session_id: SessionId,
    peer_addr: SocketAddr,
    token_payload: Vec<u8>,
) -> eyre::Result<(PlayerId, usize)> {
    let token = String::from_utf8(token_payload)?;
    let claims = state.auth.verify(&token).await?;
    let player_id = PlayerId(uuid::Uuid::parse_str(&claims.player_id)?);

    let (node_index, _endpoint) = state
        .nodes
        .assign(player_id)
        .ok_or_else(|| eyre::eyre!("no healthy game node available"))?;

    let session_meta = SessionMeta {
        remote_addr: peer_addr.to_string(),
        gateway_id: "gw-1".to_string(),
    };
    let login_message = GatewayToGame::Login {
        player_id,
        token: gw_rpc::tokens::SessionToken(token),
        session_meta,
    };
    let reply = state.call(node_index, player_id, login_message).await?;
    match reply {
        gw_rpc::GameToGateway::LoginResult(Ok(LoginResult { .. })) => Ok((player_id, node_index)),
        gw_rpc::GameToGateway::LoginResult(Err(reason)) => Err(eyre::eyre!(reason)),
        other => Err(eyre::eyre!("unexpected login reply: {other:?}")),
    }
}

/// Heartbeat ticker: periodically push a `Close` onto timed-out sessions'
/// own queues so the owning connection task performs the real Logout RPC
/// and teardown, the same path duplicate-login and graceful shutdown use.
pub async fn run_heartbeat_ticker(registry: Arc<SessionRegistry>, check_interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        ticker.tick().await;
        for session_id in registry.timed_out_sessions(timeout) {
            warn!(%session_id, "heartbeat timeout, evicting session");
            registry.send_to_session(
                session_id,
                Outbound::Close(force_disconnect_frame(), LogoutReason::HeartbeatLost),
            );
        }
    }
}

/// Broadcast a shutdown notice to every live session and give them up to
/// `drain_timeout` to flush and tear down on their own before the caller
/// force-closes whatever remains.
pub async fn begin_graceful_shutdown(registry: &SessionRegistry, drain_timeout: Duration) {
    let ids = registry.all_session_ids();
    info!(sessions = ids.len(), "broadcasting shutdown notice");
    for session_id in &ids {
        let outcome = registry.send_to_session(
            *session_id,
            Outbound::Close(force_disconnect_frame(), LogoutReason::GatewayShutdown),
        );
        if outcome != PushOutcome::Delivered {
            warn!(%session_id, "failed to deliver shutdown notice, removing directly");
            registry.remove(*session_id);
        }
    }

    let deadline = tokio::time::Instant::now() + drain_timeout;
    while tokio::time::Instant::now() < deadline {
        if registry.is_empty() {
            info!("all sessions drained before timeout");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let remaining = registry.all_session_ids();
    if !remaining.is_empty() {
        warn!(count = remaining.len(), "drain timeout elapsed, force-closing remaining sessions");
        for session_id in remaining {
            registry.remove(session_id);
        }
    }
}
