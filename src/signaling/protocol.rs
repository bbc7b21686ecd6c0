//! Wire messages exchanged with the signaling relay
//!
//! Message tags are kebab-case and field names camelCase; the relay treats
//! `sdp` and `candidate` payloads as opaque strings and never inspects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One room member as reported to a joiner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Stable user identifier
    pub user_id: String,
    /// Display name
    pub user_name: String,
}

/// Messages sent by clients to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register membership in a room
    Join {
        /// Room identifier
        room: String,
        /// Joining user
        user_id: String,
        /// Display name shown to other members
        user_name: String,
    },
    /// Remove membership; idempotent if already absent
    Leave {
        /// Room identifier
        room: String,
        /// Leaving user
        user_id: String,
    },
    /// Connection offer for one peer in the same room
    Offer {
        /// Sender identity
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque session description
        sdp: String,
    },
    /// Connection answer for one peer in the same room
    Answer {
        /// Sender identity
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque session description
        sdp: String,
    },
    /// Network candidate for one peer in the same room
    IceCandidate {
        /// Sender identity
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque candidate payload
        candidate: String,
    },
    /// Text chat, broadcast to every room member including the sender
    RoomMessage {
        /// Sender identity
        user_id: String,
        /// Message body; persistence happens upstream, not in the relay
        message: String,
    },
}

/// Messages sent by the relay to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Response to a joiner: members already present in the room
    RoomParticipants {
        /// Current members, excluding the joiner itself
        participants: Vec<ParticipantInfo>,
    },
    /// A new member joined the room
    UserJoined {
        /// Joining user
        user_id: String,
        /// Display name
        user_name: String,
    },
    /// A member left the room (explicitly or by disconnecting)
    UserLeft {
        /// Departed user
        user_id: String,
    },
    /// Forwarded connection offer
    Offer {
        /// Originating peer
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque session description
        sdp: String,
    },
    /// Forwarded connection answer
    Answer {
        /// Originating peer
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque session description
        sdp: String,
    },
    /// Forwarded network candidate
    IceCandidate {
        /// Originating peer
        from: String,
        /// Addressed recipient
        to: String,
        /// Opaque candidate payload
        candidate: String,
    },
    /// Broadcast chat message, timestamped by the relay
    RoomMessage {
        /// Sender identity
        user_id: String,
        /// Message body
        message: String,
        /// Relay receive time
        timestamp: DateTime<Utc>,
    },
}
