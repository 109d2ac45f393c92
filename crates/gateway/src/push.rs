//! Forwards a game node's pushed [`ClientEvent`]s to the session
//! currently owning each player. One event loop runs per game node,
//! owning that node's `EventSubscriber` (a ZMQ SUB socket), since the
//! socket itself isn't safely shared across tasks; sessions ask the
//! loop to (un)subscribe their player id via an mpsc command channel
//! rather than touching the socket directly.

use std::sync::Arc;

use bytes::Bytes;
use gw_common::PlayerId;
use gw_rpc::client::EventSubscriber;
use gw_rpc::ClientEvent;
use gw_wire::msg_type;
use gw_wire::Frame;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::registry::SessionRegistry;
use crate::session::{Outbound, PushOutcome};
use gw_rpc::LogoutReason;

pub enum SubscribeCmd {
    Subscribe(PlayerId),
    Unsubscribe(PlayerId),
}

/// Runs until the subscriber socket closes or the command channel is
/// dropped. Intended to be spawned once per configured game node.
pub async fn run_event_loop(
    mut subscriber: EventSubscriber,
    mut commands: mpsc::Receiver<SubscribeCmd>,
    registry: Arc<SessionRegistry>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SubscribeCmd::Subscribe(player_id)) => {
                        if let Err(err) = subscriber.subscribe_player(player_id) {
                            error!(%err, "failed to subscribe to player events");
                        }
                    }
                    Some(SubscribeCmd::Unsubscribe(player_id)) => {
                        if let Err(err) = subscriber.unsubscribe_player(player_id) {
                            error!(%err, "failed to unsubscribe from player events");
                        }
                    }
                    None => return,
                }
            }
            event = subscriber.next_event() => {
                let Some(result) = event else {
                    warn!("event subscriber socket closed");
                    return;
                };
                match result {
                    Ok((player_id, client_event)) => dispatch(&registry, player_id, client_event),
                    Err(err) => warn!(%err, "malformed push event"),
                }
            }
        }
    }
}

/// Translate a pushed [`ClientEvent`] into a wire frame and enqueue it
/// on the session owning `player_id` (recovered from the PUB topic).
fn dispatch(registry: &SessionRegistry, player_id: PlayerId, event: ClientEvent) {
    let (wire_msg_type, critical) = match &event {
        ClientEvent::EntityEnter { .. } => (msg_type::MSG_ENTITY_ENTER, false),
        ClientEvent::EntityLeave { .. } => (msg_type::MSG_ENTITY_LEAVE, false),
        ClientEvent::PositionUpdate { .. } => (msg_type::MSG_POSITION_UPDATE, false),
        ClientEvent::SkillResult { .. } => (msg_type::MSG_SKILL_RESULT, true),
        ClientEvent::SystemMessage(_) => (msg_type::MSG_ERROR, true),
        ClientEvent::ForceDisconnect { .. } => (msg_type::MSG_FORCE_DISCONNECT, true),
    };

    let payload =
        bincode::encode_to_vec(&event, bincode::config::standard()).unwrap_or_default();
    let frame = Frame::new(wire_msg_type, 0, 0, 0, Bytes::from(payload));
    let outbound = if critical {
        Outbound::Critical(frame.clone())
    } else {
        Outbound::Broadcast(frame.clone())
    };

    match registry.send_to_player(player_id, outbound) {
        PushOutcome::Delivered => {}
        PushOutcome::Dropped => {
            warn!(%player_id, msg_type = wire_msg_type, "dropped push event under backpressure");
        }
        PushOutcome::Escalate => {
            warn!(%player_id, "outbound queue full on critical push, force-closing session");
            if let Some(session_id) = registry.session_id_for_player(player_id) {
                let close = Frame::new(msg_type::MSG_FORCE_DISCONNECT, 0, 0, 0, Bytes::new());
                registry.send_to_session(
                    session_id,
                    Outbound::Close(close, LogoutReason::Backpressure),
                );
            }
        }
    }
}
