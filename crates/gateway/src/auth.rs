//! Token Verifier Client (C4): validates a client-presented bearer token
//! against the external auth service, with a short-lived verification
//! cache and bounded retry on transient unreachability.

use ahash::AHashMap;
use gw_common::error::{ErrorKind, GatewayError};
use serde::Deserialize;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyClaims {
    pub player_id: String,
    pub expires_at: String,
    #[serde(default)]
    pub claims: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("auth service unreachable: {0}")]
    AuthServiceUnreachable(String),
}

impl GatewayError for AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            AuthError::TokenExpired | AuthError::TokenInvalid => ErrorKind::Auth,
            AuthError::AuthServiceUnreachable(_) => ErrorKind::Transient,
        }
    }
}

struct CacheEntry {
    claims: VerifyClaims,
    cached_at: Instant,
}

/// HTTP client for the external auth service, with a verification cache
/// keyed by a hash of the token (so the cache never stores the raw
/// bearer value).
pub struct TokenVerifier {
    http: reqwest::Client,
    verify_url: String,
    cache_ttl: Duration,
    backoff: Vec<Duration>,
    cache: RwLock<AHashMap<u64, CacheEntry>>,
}

impl TokenVerifier {
    pub fn new(verify_url: String, cache_ttl: Duration, backoff_ms: &[u64]) -> Self {
        Self {
            http: reqwest::Client::new(),
            verify_url,
            cache_ttl,
            backoff: backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            cache: RwLock::new(AHashMap::new()),
        }
    }

    fn token_key(token: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        token.hash(&mut hasher);
        hasher.finish()
    }

    /// Verify `token`, serving a cached result if still within
    /// `token_cache_ttl`. On `AuthServiceUnreachable`, retries up to the
    /// configured backoff schedule before surfacing the error.
    pub async fn verify(&self, token: &str) -> Result<VerifyClaims, AuthError> {
        let key = Self::token_key(token);
        if let Some(entry) = self.cache.read().unwrap().get(&key) {
            if entry.cached_at.elapsed() < self.cache_ttl {
                return Ok(entry.claims.clone());
            }
        }

        let claims = self.verify_with_retry(token).await?;
        self.cache.write().unwrap().insert(
            key,
            CacheEntry {
                claims: claims.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(claims)
    }

    async fn verify_with_retry(&self, token: &str) -> Result<VerifyClaims, AuthError> {
        let mut last_err = AuthError::AuthServiceUnreachable("no attempts made".to_string());
        let attempts = self.backoff.len() + 1;
        for attempt in 0..attempts {
            match self.verify_once(token).await {
                Ok(claims) => return Ok(claims),
                Err(AuthError::AuthServiceUnreachable(msg)) => {
                    last_err = AuthError::AuthServiceUnreachable(msg);
                    if let Some(delay) = self.backoff.get(attempt) {
                        tokio::time::sleep(*delay).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err)
    }

    async fn verify_once(&self, token: &str) -> Result<VerifyClaims, AuthError> {
        let response = self
            .http
            .post(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::AuthServiceUnreachable(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json::<VerifyClaims>()
                .await
                .map_err(|e| AuthError::AuthServiceUnreachable(e.to_string())),
            401 => Err(AuthError::TokenInvalid),
            419 | 440 => Err(AuthError::TokenExpired),
            status => Err(AuthError::AuthServiceUnreachable(format!(
                "unexpected status {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_key_is_deterministic() {
        assert_eq!(TokenVerifier::token_key("abc"), TokenVerifier::token_key("abc"));
        assert_ne!(TokenVerifier::token_key("abc"), TokenVerifier::token_key("xyz"));
    }

    #[tokio::test]
    async fn unreachable_service_surfaces_transient_after_retries() {
        let verifier = TokenVerifier::new(
            "http://127.0.0.1:1/verify".to_string(),
            Duration::from_secs(30),
            &[1, 1],
        );
        let result = verifier.verify("sometoken").await;
        assert!(matches!(result, Err(AuthError::AuthServiceUnreachable(_))));
    }
}
