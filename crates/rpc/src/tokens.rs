//! Signed tokens carried on RPC calls. `SessionToken` authenticates a
//! gateway-held session to the game node that issued it; `NodeToken`
//! authenticates a game node to the gateway's RPC transport (the shared
//! secret §6 calls for between internal RPC peers). Both are opaque
//! PASETO strings to their holders; only the issuing side needs the
//! keypair used to mint and verify them.

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rusty_paseto::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const GATEWAY_SESSION_TOKEN_FOOTER: &str = "key-id:gw_session";
pub const GATEWAY_NODE_TOKEN_FOOTER: &str = "key-id:gw_node";

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SessionToken(pub String);

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct NodeToken(pub String);

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("could not parse PEM-encoded key")]
    KeyParseError,
    #[error("incorrect key format for key: {0}")]
    IncorrectKeyFormat(String),
    #[error("could not read key from file: {0}")]
    ReadError(std::io::Error),
}

/// Parse a base64-encoded symmetric key used to sign/verify local (`V4,
/// Local`) PASETO tokens exchanged between a gateway and the game nodes
/// it talks to.
pub fn parse_key(base64_key: &str) -> Result<Key<32>, KeyError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_key.trim())
        .map_err(|_| KeyError::KeyParseError)?;
    if bytes.len() != 32 {
        return Err(KeyError::IncorrectKeyFormat(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);
    Ok(Key::<32>::from(key_bytes))
}

/// Load a symmetric key from a base64-encoded file on disk.
pub fn load_key(path: &Path) -> Result<Key<32>, KeyError> {
    let contents = std::fs::read_to_string(path).map_err(KeyError::ReadError)?;
    parse_key(&contents)
}

/// A game node's identity keypair, used to sign the `NodeToken` it
/// presents to the gateway's RPC transport as the internal shared
/// secret. The public half is distributed to gateways out of band (via
/// the same configuration layer as `rpc.game.addr`).
pub fn load_node_keypair(
    public_key: &Path,
    private_key: &Path,
) -> Result<ed25519_dalek::SigningKey, KeyError> {
    let private_pem = std::fs::read_to_string(private_key).map_err(KeyError::ReadError)?;
    let signing_key =
        ed25519_dalek::SigningKey::from_pkcs8_pem(&private_pem).map_err(|_| KeyError::KeyParseError)?;

    let public_pem = std::fs::read_to_string(public_key).map_err(KeyError::ReadError)?;
    let verifying_key = ed25519_dalek::VerifyingKey::from_public_key_pem(&public_pem)
        .map_err(|_| KeyError::KeyParseError)?;
    if signing_key.verifying_key() != verifying_key {
        return Err(KeyError::IncorrectKeyFormat(
            "public key does not match private key".to_string(),
        ));
    }
    Ok(signing_key)
}

/// Mint a session token binding a gateway session to a player, signed
/// with the shared key, valid until `expires_at`.
pub fn make_session_token(key: &Key<32>, player_id: &str, expires_at: &str) -> SessionToken {
    let paseto_key = PasetoSymmetricKey::<V4, Local>::from(key.as_ref());
    let token = PasetoBuilder::<V4, Local>::default()
        .set_claim(SubjectClaim::from(player_id))
        .set_claim(ExpirationClaim::try_from(expires_at).expect("caller-supplied RFC3339 timestamp"))
        .set_footer(Footer::from(GATEWAY_SESSION_TOKEN_FOOTER))
        .build(&paseto_key)
        .expect("token signing cannot fail for well-formed claims");
    SessionToken(token)
}

/// Verify and decode a session token, returning its subject (player id)
/// claim if the signature and expiry are valid.
pub fn verify_session_token(key: &Key<32>, token: &SessionToken) -> Result<String, KeyError> {
    let paseto_key = PasetoSymmetricKey::<V4, Local>::from(key.as_ref());
    let generic_parser = PasetoParser::<V4, Local>::default();
    let claims = generic_parser
        .check_claim(ExpirationClaim::default())
        .parse(&token.0, &paseto_key)
        .map_err(|_| KeyError::KeyParseError)?;
    claims
        .get("sub")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(KeyError::KeyParseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Key<32> {
        Key::<32>::from([7u8; 32])
    }

    #[test]
    fn parse_key_rejects_wrong_length() {
        let result = parse_key("deadbeef");
        assert!(matches!(result, Err(KeyError::IncorrectKeyFormat(_))));
    }

    #[test]
    fn session_token_round_trips_subject_claim() {
        let key = test_key();
        let token = make_session_token(&key, "player-1", "2099-01-01T00:00:00+00:00");
        let subject = verify_session_token(&key, &token).unwrap();
        assert_eq!(subject, "player-1");
    }

    #[test]
    fn session_token_rejected_under_wrong_key() {
        let key = test_key();
        let other_key = Key::<32>::from([9u8; 32]);
        let token = make_session_token(&key, "player-1", "2099-01-01T00:00:00+00:00");
        assert!(verify_session_token(&other_key, &token).is_err());
    }
}
