//! Gateway error types.

use nodegate_core::WireError;
use nodegate_crypto::{CipherError, IdentityError};
use thiserror::Error;

/// Why a message was not accepted or could not be built.
///
/// `Protocol`, `NotSigned`, `NoStream` and `Degraded` drop the message and
/// leave the session untouched. `IdentityMismatch`, `StaleInitial`,
/// `ReplayedInitial` and `CipherMismatch` set the error flag. `Crypto` sets
/// the crypto error flag, which clears itself after the configured timeout.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("peer identity changed: {0}")]
    IdentityMismatch(String),

    #[error("peer INITIAL timestamp is {skew}s away from the local clock")]
    StaleInitial { skew: u64 },

    #[error("INITIAL from an earlier session (timestamp {timestamp}, current {current})")]
    ReplayedInitial { timestamp: u64, current: u64 },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("connection is not signed")]
    NotSigned,

    #[error("peer announced a different cipher")]
    CipherMismatch,

    #[error("stream is not established")]
    NoStream,

    #[error("peer asked for the previous key but none is configured")]
    NoPreviousIdentity,

    #[error("session is in an error state until reset")]
    Degraded,

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl GatewayError {
    pub(crate) fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}
