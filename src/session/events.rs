//! Session event stream
//!
//! Everything a session reports to its embedder flows through one broadcast
//! channel of [`SessionEvent`] values. Slow subscribers lag rather than
//! block the session.

use crate::media::{ConstraintTier, RemoteStream};
use crate::peer::LinkState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// What happened in the room, in delivery order per subscriber
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Local capture is live
    LocalStreamReady {
        tier: ConstraintTier,
        /// True when the capture landed below the requested tier
        degraded: bool,
    },
    /// A peer is present in the room (already there at join, or joined later)
    PeerJoined { peer_id: String, peer_name: String },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// A peer link changed lifecycle state
    LinkStateChanged { peer_id: String, state: LinkState },
    /// Remote media arrived for a peer
    RemoteStreamAdded {
        peer_id: String,
        stream: Arc<RemoteStream>,
    },
    /// Remote media went away, because the peer left or the link is being
    /// renegotiated; a fresh `RemoteStreamAdded` follows on recovery
    RemoteStreamRemoved { peer_id: String },
    /// A reconnection attempt was scheduled
    ReconnectScheduled {
        peer_id: String,
        attempt: u32,
        delay: Duration,
    },
    /// A link recovered after reconnection
    PeerRecovered { peer_id: String },
    /// A link exhausted its retries and was failed
    PeerFailed { peer_id: String },
    /// Chat message, relay-timestamped, sender included
    Chat {
        user_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}
