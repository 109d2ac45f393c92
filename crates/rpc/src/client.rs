//! Gateway-side async RPC client: a DEALER socket connected to a game
//! node's ROUTER endpoint, plus a SUB socket for that node's PUB events,
//! subscribed to this gateway's own player topics only.

use bincode::config::standard;
use futures_util::{SinkExt, StreamExt};
use gw_common::PlayerId;
use std::time::Duration;
use tmq::Multipart;

use crate::messages::{GameToGateway, GatewayToGame};
use crate::transport::{decode_reply, encode_request};

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("rpc call to game node timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] tmq::TmqError),
    #[error("encoding error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("game node sent an empty reply")]
    EmptyReply,
}

/// An async client for the gateway->game-node request/reply plane.
pub struct RpcClient {
    dealer: tmq::dealer::Dealer,
    deadline: Duration,
}

impl RpcClient {
    pub fn connect(ctx: &tmq::Context, rpc_endpoint: &str, deadline: Duration) -> eyre::Result<Self> {
        let dealer = tmq::dealer(ctx).connect(rpc_endpoint)?;
        Ok(Self { dealer, deadline })
    }

    /// Issue a single request and await its reply, or [`RpcClientError::Timeout`]
    /// once `deadline` elapses — the caller surfaces this to the client as
    /// the wire-level `Timeout` error per the RPC contract's cancellation rule.
    pub async fn call(
        &mut self,
        player_id: PlayerId,
        message: GatewayToGame,
    ) -> Result<GameToGateway, RpcClientError> {
        let body = encode_request(player_id, message)?;
        let multipart: Multipart = vec![body.into()].into();
        self.dealer.send(multipart).await?;

        let reply = tokio::time::timeout(self.deadline, self.dealer.next())
            .await
            .map_err(|_| RpcClientError::Timeout)?
            .ok_or(RpcClientError::EmptyReply)??;

        let frame = reply.into_iter().next().ok_or(RpcClientError::EmptyReply)?;
        Ok(decode_reply(&frame)?)
    }
}

/// Subscribes to a single node's PUB events socket, filtered to the
/// topics (player ids) this gateway currently owns sessions for.
pub struct EventSubscriber {
    sub: tmq::subscribe::Subscribe,
}

impl EventSubscriber {
    pub fn connect(ctx: &tmq::Context, events_endpoint: &str) -> eyre::Result<Self> {
        let sub = tmq::subscribe(ctx).connect(events_endpoint)?;
        Ok(Self { sub })
    }

    /// Subscribe to push events addressed to a specific player.
    pub fn subscribe_player(&mut self, player_id: PlayerId) -> eyre::Result<()> {
        let topic = bincode::encode_to_vec(player_id, standard())?;
        self.sub.set_subscribe(&topic)?;
        Ok(())
    }

    pub fn unsubscribe_player(&mut self, player_id: PlayerId) -> eyre::Result<()> {
        let topic = bincode::encode_to_vec(player_id, standard())?;
        self.sub.set_unsubscribe(&topic)?;
        Ok(())
    }

    /// Receive the next pushed event along with the player id its PUB
    /// topic was addressed to -- the topic IS the recipient, so callers
    /// don't need the event payload itself to carry a player id.
    pub async fn next_event(
        &mut self,
    ) -> Option<Result<(PlayerId, crate::messages::ClientEvent), RpcClientError>> {
        let multipart = self.sub.next().await?.ok()?;
        let mut parts = multipart.into_iter();
        let topic = parts.next()?;
        let body = parts.next()?;
        let player_id = match bincode::decode_from_slice::<PlayerId, _>(&topic, standard()) {
            Ok((id, _)) => id,
            Err(err) => return Some(Err(RpcClientError::Decode(err))),
        };
        Some(
            bincode::decode_from_slice(&body, standard())
                .map(|(event, _)| (player_id, event))
                .map_err(RpcClientError::Decode),
        )
    }
}
