//! Crate-wide error types

use crate::peer::LinkState;
use thiserror::Error;

/// Errors produced by the studymesh core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Signaling relay unreachable or the connection to it was lost
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Relay-side failure (bind, room bookkeeping)
    #[error("relay error: {0}")]
    Relay(String),

    /// Peer transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No peer link exists for the given identity
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A live link already exists for the given identity
    #[error("duplicate peer link: {0}")]
    DuplicateLink(String),

    /// Attempted link state transition is not part of the lifecycle
    #[error("invalid link state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the link was in
        from: LinkState,
        /// State the transition asked for
        to: LinkState,
    },

    /// Capture permission denied by the user; never retried
    #[error("capture permission denied")]
    PermissionDenied,

    /// Every capture tier failed
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Session lifecycle misuse (not initialized, no local media, ...)
    #[error("session error: {0}")]
    Session(String),

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for studymesh operations
pub type Result<T> = std::result::Result<T, Error>;
