//! Opaque identifiers shared across the wire, RPC, AOI and persistence
//! layers. Each is a thin wrapper so the compiler keeps the id spaces
//! apart (a `NodeId` can never be handed where a `PlayerId` is expected).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// `bincode` has no blanket impl for `Uuid`; each wrapper below forwards
/// to its 16-byte representation so these ids can ride directly in RPC
/// message enums without a `#[bincode(with_serde)]` escape hatch.
macro_rules! impl_bincode_for_uuid_newtype {
    ($ty:ident) => {
        impl Encode for $ty {
            fn encode<E: bincode::enc::Encoder>(
                &self,
                encoder: &mut E,
            ) -> Result<(), bincode::error::EncodeError> {
                self.0.as_bytes().encode(encoder)
            }
        }

        impl<Ctx> Decode<Ctx> for $ty {
            fn decode<D: bincode::de::Decoder<Context = Ctx>>(
                decoder: &mut D,
            ) -> Result<Self, bincode::error::DecodeError> {
                let bytes: [u8; 16] = Decode::decode(decoder)?;
                Ok($ty(Uuid::from_bytes(bytes)))
            }
        }
    };
}

/// Globally-unique identifier for a player account.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection identifier allocated by the gateway on accept.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a game-service process instance.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything indexed by the AOI grid: a player runtime, an NPC, a projectile.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_player(player_id: PlayerId) -> Self {
        Self(player_id.0)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl_bincode_for_uuid_newtype!(PlayerId);
impl_bincode_for_uuid_newtype!(SessionId);
impl_bincode_for_uuid_newtype!(EntityId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn player_id_round_trips_through_bincode() {
        let id = PlayerId::new();
        let encoded = bincode::encode_to_vec(id, bincode::config::standard()).unwrap();
        let (decoded, _): (PlayerId, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn entity_id_from_player_round_trips_the_uuid() {
        let p = PlayerId::new();
        let e = EntityId::from_player(p);
        assert_eq!(e.0, p.0);
    }
}
