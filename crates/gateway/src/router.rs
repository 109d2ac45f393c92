//! Session Router (C3): dispatches one inbound frame per call. Stateless
//! beyond the `Session` reference it's handed — all per-connection
//! concurrency is already serialized by the connection's reader task
//! processing frames one at a time in arrival order.

use gw_common::{PlayerId, SessionId};
use gw_rpc::{GatewayToGame, LogoutReason, PositionWire, SessionMeta};
use gw_wire::msg_type::{self, MsgRange};
use gw_wire::Frame;
use tracing::{debug, warn};

use crate::session::AuthState;

/// What the router decided to do with one inbound frame. The connection
/// task (or a test) executes the action; the router itself performs no
/// I/O so its dispatch logic is synchronous and easy to unit test.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    HeartbeatAck,
    AuthRequired,
    /// `msg_type == PlayerLogin`: hand off to the auth flow (C4) with the
    /// raw payload (expected to carry the bearer token).
    BeginLogin { payload: Vec<u8> },
    Forward { player_id: PlayerId, message: GatewayToGame },
}

/// Pure dispatch: given the session's current auth state and an inbound
/// frame, decide what happens next. Router carries no mutable state of
/// its own per the one-router-per-gateway design; `auth_state` is read
/// from (and in the `BeginLogin`/bind case, updated by the caller in)
/// the `SessionRegistry`.
pub fn route(
    _session_id: SessionId,
    auth_state: AuthState,
    frame: &Frame,
) -> RouteOutcome {
    if frame.msg_type == msg_type::MSG_HEARTBEAT {
        return RouteOutcome::HeartbeatAck;
    }

    let AuthState::Authenticated(player_id) = auth_state else {
        if frame.msg_type == msg_type::MSG_PLAYER_LOGIN {
            return RouteOutcome::BeginLogin {
                payload: frame.payload.to_vec(),
            };
        }
        warn!(msg_type = frame.msg_type, "rejecting frame from anonymous session");
        return RouteOutcome::AuthRequired;
    };

    let message = match frame.msg_type {
        t if t == msg_type::MSG_LOGOUT => GatewayToGame::Logout {
            player_id,
            reason: LogoutReason::ClientRequest,
        },
        t if t == msg_type::MSG_MOVE => match decode_move_payload(&frame.payload) {
            Some((target, client_ts)) => GatewayToGame::Move {
                player_id,
                target_position: target,
                client_ts,
            },
            None => {
                warn!("malformed Move payload");
                GatewayToGame::GenericMessage {
                    player_id,
                    msg_type: frame.msg_type,
                    payload: frame.payload.to_vec(),
                }
            }
        },
        t if t == msg_type::MSG_CAST_SKILL => match decode_cast_skill_payload(&frame.payload) {
            Some((skill_id, target_entity_id)) => GatewayToGame::CastSkill {
                player_id,
                skill_id,
                target_entity_id,
            },
            None => {
                warn!("malformed CastSkill payload");
                GatewayToGame::GenericMessage {
                    player_id,
                    msg_type: frame.msg_type,
                    payload: frame.payload.to_vec(),
                }
            }
        },
        other => {
            debug!(msg_type = other, range = ?MsgRange::of(other), "routing via generic RPC path");
            GatewayToGame::GenericMessage {
                player_id,
                msg_type: other,
                payload: frame.payload.to_vec(),
            }
        }
    };

    RouteOutcome::Forward { player_id, message }
}

/// Opaque payload layout for a Move frame: bincode-encoded
/// `(PositionWire, u64)`. Content modules on the generic path define
/// their own payload shape; first-class methods like this one fix
/// theirs so the router can decode without round-tripping through the
/// game node.
fn decode_move_payload(payload: &[u8]) -> Option<(PositionWire, u64)> {
    bincode::decode_from_slice(payload, bincode::config::standard())
        .ok()
        .map(|(v, _)| v)
}

fn decode_cast_skill_payload(payload: &[u8]) -> Option<(u32, Option<gw_common::EntityId>)> {
    bincode::decode_from_slice(payload, bincode::config::standard())
        .ok()
        .map(|(v, _)| v)
}

pub fn session_meta_for(remote_addr: &str, gateway_id: &str) -> SessionMeta {
    SessionMeta {
        remote_addr: remote_addr.to_string(),
        gateway_id: gateway_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(msg_type: u16, payload: Bytes) -> Frame {
        Frame::new(msg_type, 0, 0, 1, payload)
    }

    #[test]
    fn heartbeat_is_acked_regardless_of_auth_state() {
        let outcome = route(SessionId::new(), AuthState::Anonymous, &frame(msg_type::MSG_HEARTBEAT, Bytes::new()));
        assert_eq!(outcome, RouteOutcome::HeartbeatAck);
    }

    #[test]
    fn anonymous_non_login_frame_is_rejected() {
        let outcome = route(SessionId::new(), AuthState::Anonymous, &frame(msg_type::MSG_MOVE, Bytes::new()));
        assert_eq!(outcome, RouteOutcome::AuthRequired);
    }

    #[test]
    fn anonymous_login_frame_begins_auth_flow() {
        let outcome = route(
            SessionId::new(),
            AuthState::Anonymous,
            &frame(msg_type::MSG_PLAYER_LOGIN, Bytes::from_static(b"tok")),
        );
        assert_eq!(
            outcome,
            RouteOutcome::BeginLogin {
                payload: b"tok".to_vec()
            }
        );
    }

    #[test]
    fn authenticated_frame_ignores_header_hint_and_uses_session_player_id() {
        let player_id = PlayerId::new();
        let mut f = frame(msg_type::MSG_LOGOUT, Bytes::new());
        f.player_id_hint = 0xDEADBEEF;
        let outcome = route(SessionId::new(), AuthState::Authenticated(player_id), &f);
        match outcome {
            RouteOutcome::Forward { player_id: routed, message: GatewayToGame::Logout { player_id: msg_player, .. } } => {
                assert_eq!(routed, player_id);
                assert_eq!(msg_player, player_id);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_msg_type_falls_back_to_generic_message() {
        let player_id = PlayerId::new();
        let outcome = route(
            SessionId::new(),
            AuthState::Authenticated(player_id),
            &frame(0x3050, Bytes::from_static(b"payload")),
        );
        assert_eq!(
            outcome,
            RouteOutcome::Forward {
                player_id,
                message: GatewayToGame::GenericMessage {
                    player_id,
                    msg_type: 0x3050,
                    payload: b"payload".to_vec(),
                }
            }
        );
    }
}
