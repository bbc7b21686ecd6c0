//! Signaling: wire protocol, relay server, and client connection

pub mod client;
pub mod protocol;
pub mod relay;

pub use client::{connect, SignalingHandle};
pub use protocol::{ClientMessage, ParticipantInfo, ServerMessage};
pub use relay::RelayState;
