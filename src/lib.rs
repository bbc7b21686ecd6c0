//! Peer-to-peer group study sessions: signaling relay, connection
//! orchestration, and connection resilience.
//!
//! The crate has two halves:
//!
//! - [`signaling`] contains the WebSocket relay server (run it with the
//!   `relay-server` binary) and the client connection to it. The relay
//!   tracks room membership and forwards opaque setup payloads; it never
//!   touches media.
//! - [`session`] is the client core: a [`session::RoomSession`] joins a
//!   room, builds one [`peer::PeerLink`] per remote member, attaches local
//!   capture chosen by the [`media`] fallback ladder, and keeps the links
//!   alive through the [`health`] monitor, the [`reconnect`] policy, and
//!   [`visibility`] protection against background-tab teardown.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use studymesh::config::MeshConfig;
//! use studymesh::media::SyntheticCaptureDevice;
//! use studymesh::peer::SdpTransportFactory;
//! use studymesh::session::RoomSession;
//!
//! # async fn run() -> studymesh::Result<()> {
//! let session = RoomSession::new(
//!     MeshConfig::default(),
//!     "calculus-study-group",
//!     "user-42",
//!     "Sam",
//!     Arc::new(SyntheticCaptureDevice),
//!     Arc::new(SdpTransportFactory),
//! )?;
//! session.initialize().await?;
//! let _events = session.subscribe();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod media;
pub mod peer;
pub mod reconnect;
pub mod session;
pub mod signaling;
pub mod visibility;

pub use config::MeshConfig;
pub use error::{Error, Result};
pub use session::{RoomSession, SessionEvent};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
