//! Peer link management
//!
//! Link lifecycle, negotiation roles, the one-link-per-pair registry, and
//! the transport seam.

pub mod link;
pub mod transport;

pub use link::{LinkRole, LinkState, PeerLink, PeerRegistry};
pub use transport::{PeerTransport, SdpTransport, SdpTransportFactory, TransportFactory, TransportState};
