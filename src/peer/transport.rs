//! Transport seam for peer links
//!
//! The resilience machinery never talks to a native media stack directly; it
//! drives a [`PeerTransport`] trait object. [`SdpTransport`] is the in-crate
//! implementation that models the offer/answer/candidate exchange as opaque
//! strings; a production driver reports lower-level connectivity changes
//! through [`SdpTransport::set_state`].

use crate::health::HeartbeatFrame;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// Transport-level connection state, as reported by the lower layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, negotiation not started
    New,
    /// Negotiation in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily unreachable; often self-heals
    Disconnected,
    /// Unrecoverable at the transport layer
    Failed,
    /// Torn down
    Closed,
}

/// One peer-to-peer transport instance
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Produce a local offer description
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer and produce the local answer
    async fn create_answer(&self, offer_sdp: String) -> Result<String>;

    /// Apply the remote answer to a previously created offer
    async fn accept_answer(&self, answer_sdp: String) -> Result<()>;

    /// Apply a remote network candidate
    async fn add_ice_candidate(&self, candidate: String) -> Result<()>;

    /// Current transport-level state
    async fn state(&self) -> TransportState;

    /// Send a frame on the auxiliary heartbeat channel
    async fn send_heartbeat(&self, frame: HeartbeatFrame) -> Result<()>;

    /// Tear the transport down; terminal
    async fn close(&self) -> Result<()>;
}

/// Builds fresh transports for initial negotiation and reconnection
pub trait TransportFactory: Send + Sync {
    /// Create a transport for the connection to `remote_id`
    fn create(&self, remote_id: &str) -> Arc<dyn PeerTransport>;
}

/// Modeled peer transport
///
/// Negotiation completes when both descriptions are applied: the initiator
/// reports `Connected` after [`accept_answer`](PeerTransport::accept_answer),
/// the answerer after [`create_answer`](PeerTransport::create_answer).
pub struct SdpTransport {
    remote_id: String,
    connection_id: String,
    state: Arc<RwLock<TransportState>>,
    local_sdp: Arc<RwLock<Option<String>>>,
    remote_sdp: Arc<RwLock<Option<String>>>,
    ice_candidates: Arc<RwLock<Vec<String>>>,
    sent_heartbeats: Arc<RwLock<Vec<HeartbeatFrame>>>,
    connected_at: Arc<RwLock<Option<Instant>>>,
}

impl SdpTransport {
    /// Create a transport for the connection to `remote_id`
    pub fn new(remote_id: &str) -> Self {
        let connection_id = uuid::Uuid::new_v4().to_string();
        debug!(remote_id, connection_id, "creating peer transport");

        Self {
            remote_id: remote_id.to_string(),
            connection_id,
            state: Arc::new(RwLock::new(TransportState::New)),
            local_sdp: Arc::new(RwLock::new(None)),
            remote_sdp: Arc::new(RwLock::new(None)),
            ice_candidates: Arc::new(RwLock::new(Vec::new())),
            sent_heartbeats: Arc::new(RwLock::new(Vec::new())),
            connected_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Unique id of this transport instance
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Remote peer this transport connects to
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Report a lower-level state change.
    ///
    /// Production drivers call this from their connectivity callbacks; tests
    /// use it to simulate transport failures.
    pub async fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.write().await;
        let old_state = *state;
        if old_state != new_state {
            debug!(
                remote_id = %self.remote_id,
                "transport state transition: {:?} -> {:?}",
                old_state, new_state
            );
            *state = new_state;
            if new_state == TransportState::Connected {
                *self.connected_at.write().await = Some(Instant::now());
            }
        }
    }

    /// Number of candidates applied so far
    pub async fn ice_candidate_count(&self) -> usize {
        self.ice_candidates.read().await.len()
    }

    /// Heartbeat frames handed to this transport, oldest first
    pub async fn sent_heartbeats(&self) -> Vec<HeartbeatFrame> {
        self.sent_heartbeats.read().await.clone()
    }

    fn placeholder_sdp(&self) -> String {
        let epoch_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.connection_id, epoch_secs
        )
    }

    async fn ensure_open(&self) -> Result<()> {
        match *self.state.read().await {
            TransportState::Closed => Err(Error::Transport(format!(
                "transport to {} is closed",
                self.remote_id
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PeerTransport for SdpTransport {
    async fn create_offer(&self) -> Result<String> {
        self.ensure_open().await?;
        let sdp = self.placeholder_sdp();
        *self.local_sdp.write().await = Some(sdp.clone());
        self.set_state(TransportState::Connecting).await;
        debug!(remote_id = %self.remote_id, "created offer");
        Ok(sdp)
    }

    async fn create_answer(&self, offer_sdp: String) -> Result<String> {
        self.ensure_open().await?;
        *self.remote_sdp.write().await = Some(offer_sdp);
        let sdp = self.placeholder_sdp();
        *self.local_sdp.write().await = Some(sdp.clone());
        // both descriptions applied
        self.set_state(TransportState::Connected).await;
        debug!(remote_id = %self.remote_id, "created answer");
        Ok(sdp)
    }

    async fn accept_answer(&self, answer_sdp: String) -> Result<()> {
        self.ensure_open().await?;
        if self.local_sdp.read().await.is_none() {
            return Err(Error::Transport(format!(
                "answer from {} without a pending offer",
                self.remote_id
            )));
        }
        *self.remote_sdp.write().await = Some(answer_sdp);
        self.set_state(TransportState::Connected).await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: String) -> Result<()> {
        self.ensure_open().await?;
        self.ice_candidates.write().await.push(candidate);
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    async fn send_heartbeat(&self, frame: HeartbeatFrame) -> Result<()> {
        match *self.state.read().await {
            TransportState::Connected => {
                self.sent_heartbeats.write().await.push(frame);
                Ok(())
            }
            state => Err(Error::Transport(format!(
                "heartbeat channel to {} unavailable in state {:?}",
                self.remote_id, state
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        debug!(remote_id = %self.remote_id, "closing transport");
        self.set_state(TransportState::Closed).await;
        Ok(())
    }
}

/// Factory producing [`SdpTransport`] instances
#[derive(Default)]
pub struct SdpTransportFactory;

impl TransportFactory for SdpTransportFactory {
    fn create(&self, remote_id: &str) -> Arc<dyn PeerTransport> {
        Arc::new(SdpTransport::new(remote_id))
    }
}
