//! Error-kind taxonomy shared by every component. Concrete error enums
//! live in their owning crate (`wire::DecodeError`, `rpc::RpcError`, ...)
//! and implement [`GatewayError`] so routing/logging/retry policy can
//! dispatch on [`ErrorKind`] without matching every concrete variant.

use thiserror::Error;

/// The propagation policy for an error is determined by its kind, not its
/// concrete type. See the error handling design: each kind has a fixed
/// disposition (close, retry, reply, alert...).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Malformed wire data. Close connection with code, no retry.
    Protocol,
    /// Token invalid/expired. Reply AuthError, keep socket or close per config.
    Auth,
    /// Client-supplied input rejected. Reply structured error, keep session.
    Validation,
    /// Transient failure in a downstream call. Retry per component policy.
    Transient,
    /// Optimistic-concurrency conflict. Re-sync from primary, retry once, else fatal.
    Consistency,
    /// Unrecoverable for this player/connection. Force-logout, alert, isolate.
    Fatal,
    /// Graceful shutdown in progress. Drain, flush, close; no retry.
    Shutdown,
}

impl ErrorKind {
    /// Whether an error of this kind should ever be retried by its caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether an error of this kind means the connection/session must close.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorKind::Protocol | ErrorKind::Fatal | ErrorKind::Shutdown)
    }
}

/// Implemented by every component-local error enum so cross-cutting code
/// (logging middleware, the session router's reply path) can ask "what do
/// I do with this?" without a full match.
pub trait GatewayError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}

/// A minimal top-level error used by glue code (binaries, config loading)
/// that doesn't need its own dedicated enum.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError for CommonError {
    fn kind(&self) -> ErrorKind {
        match self {
            CommonError::Config(_) => ErrorKind::Fatal,
            CommonError::Io(_) => ErrorKind::Transient,
        }
    }
}

/// Process exit codes for the gateway/game binaries (external interface
/// §6): fixed codes so operators and process supervisors can distinguish
/// "config is wrong" from "a dependency is down" from "asked to stop."
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_INVALID: i32 = 1;
    pub const BIND_FAILURE: i32 = 2;
    pub const PEER_UNREACHABLE: i32 = 3;
    pub const SIGNALED_SHUTDOWN: i32 = 130;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn protocol_fatal_shutdown_are_terminal() {
        assert!(ErrorKind::Protocol.is_terminal());
        assert!(ErrorKind::Fatal.is_terminal());
        assert!(ErrorKind::Shutdown.is_terminal());
        assert!(!ErrorKind::Validation.is_terminal());
        assert!(!ErrorKind::Auth.is_terminal());
    }
}
