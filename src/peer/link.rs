//! Peer link lifecycle and registry
//!
//! A [`PeerLink`] is the per-remote-participant connection state. There is at
//! most one link per (local, remote) pair at any time; [`PeerRegistry`]
//! enforces that a stale link is fully torn down before a replacement exists.

use crate::media::{LocalStream, RemoteStream};
use crate::peer::transport::PeerTransport;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no offer exchanged yet
    New,
    /// Offer sent or received, answer pending
    Negotiating,
    /// Media flowing
    Connected,
    /// Transport reported a disconnect; reconnection may recover it
    Disconnected,
    /// Max retries exceeded; terminal
    Failed,
    /// Explicit or remote leave; terminal
    Closed,
}

impl LinkState {
    /// Whether the state admits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }

    fn can_transition(self, to: LinkState) -> bool {
        match (self, to) {
            (LinkState::New, LinkState::Negotiating)
            | (LinkState::Negotiating, LinkState::Connected)
            | (LinkState::Negotiating, LinkState::Disconnected)
            | (LinkState::Connected, LinkState::Disconnected)
            | (LinkState::Disconnected, LinkState::Negotiating)
            | (LinkState::Disconnected, LinkState::Connected)
            | (LinkState::Disconnected, LinkState::Failed)
            | (LinkState::Negotiating, LinkState::Failed) => true,
            // explicit or remote leave closes a link from any live state
            (from, LinkState::Closed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Which side of the pair drives negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Sends the offer; the lexicographically smaller identity
    Initiator,
    /// Answers the remote offer
    Answerer,
}

impl LinkRole {
    /// Tie-break for simultaneous mutual connection attempts: the
    /// participant with the smaller identity initiates.
    pub fn for_pair(local_id: &str, remote_id: &str) -> LinkRole {
        if local_id < remote_id {
            LinkRole::Initiator
        } else {
            LinkRole::Answerer
        }
    }
}

/// Per-remote-participant connection state
pub struct PeerLink {
    remote_id: String,
    remote_name: String,
    role: LinkRole,
    state_tx: watch::Sender<LinkState>,
    transport: RwLock<Arc<dyn PeerTransport>>,
    local_stream: RwLock<Option<Arc<LocalStream>>>,
    remote_stream: RwLock<Option<Arc<RemoteStream>>>,
    last_heartbeat_sent: parking_lot::Mutex<Option<Instant>>,
    last_heartbeat_received: parking_lot::Mutex<Option<Instant>>,
    connected_at: parking_lot::Mutex<Option<Instant>>,
    retries: AtomicU32,
    paused: AtomicBool,
}

impl PeerLink {
    /// Create a link to `remote_id` in its initial state
    pub fn new(
        remote_id: &str,
        remote_name: &str,
        role: LinkRole,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        debug!(remote_id, ?role, "creating peer link");
        let (state_tx, _) = watch::channel(LinkState::New);
        Self {
            remote_id: remote_id.to_string(),
            remote_name: remote_name.to_string(),
            role,
            state_tx,
            transport: RwLock::new(transport),
            local_stream: RwLock::new(None),
            remote_stream: RwLock::new(None),
            last_heartbeat_sent: parking_lot::Mutex::new(None),
            last_heartbeat_received: parking_lot::Mutex::new(None),
            connected_at: parking_lot::Mutex::new(None),
            retries: AtomicU32::new(0),
            paused: AtomicBool::new(false),
        }
    }

    /// Remote participant identity
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Remote display name
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Negotiation role this link was created with; reconnection re-issues
    /// the same role
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Observe state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Move the link to `to`, validating the edge
    pub fn transition(&self, to: LinkState) -> Result<()> {
        let mut result = Ok(());
        self.state_tx.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            if !current.can_transition(to) {
                result = Err(Error::InvalidTransition { from: *current, to });
                return false;
            }
            debug!(
                remote_id = %self.remote_id,
                "link state transition: {:?} -> {:?}",
                *current, to
            );
            *current = to;
            true
        });
        if result.is_ok() && to == LinkState::Connected {
            *self.connected_at.lock() = Some(Instant::now());
        }
        result
    }

    /// Wait until the link reaches `want`, or fail on terminal state or
    /// deadline.
    pub async fn await_state(&self, want: LinkState, deadline: Duration) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let waited = tokio::time::timeout(deadline, async {
            loop {
                let current = *rx.borrow_and_update();
                if current == want {
                    return Ok(());
                }
                if current.is_terminal() {
                    return Err(Error::Transport(format!(
                        "link to {} reached {:?} while waiting for {:?}",
                        self.remote_id, current, want
                    )));
                }
                if rx.changed().await.is_err() {
                    return Err(Error::Transport(format!(
                        "link to {} dropped while waiting for {:?}",
                        self.remote_id, want
                    )));
                }
            }
        })
        .await;
        match waited {
            Ok(inner) => inner,
            Err(_) => Err(Error::Transport(format!(
                "timed out waiting for link to {} to reach {:?}",
                self.remote_id, want
            ))),
        }
    }

    /// The transport currently backing this link
    pub async fn transport(&self) -> Arc<dyn PeerTransport> {
        self.transport.read().await.clone()
    }

    /// Swap in a fresh transport; the caller closes the stale one first
    pub async fn replace_transport(&self, transport: Arc<dyn PeerTransport>) {
        *self.transport.write().await = transport;
    }

    /// Attach the shared local stream. Links never mutate the stream; only
    /// the orchestrator does.
    pub async fn attach_local_stream(&self, stream: Arc<LocalStream>) {
        *self.local_stream.write().await = Some(stream);
    }

    /// The local stream attached to this link, if media is live
    pub async fn local_stream(&self) -> Option<Arc<LocalStream>> {
        self.local_stream.read().await.clone()
    }

    /// Record the negotiated remote stream
    pub async fn set_remote_stream(&self, stream: Arc<RemoteStream>) {
        *self.remote_stream.write().await = Some(stream);
    }

    /// The negotiated remote stream, if any
    pub async fn remote_stream(&self) -> Option<Arc<RemoteStream>> {
        self.remote_stream.read().await.clone()
    }

    /// Drop the negotiated remote stream, returning it if one was set
    pub async fn take_remote_stream(&self) -> Option<Arc<RemoteStream>> {
        self.remote_stream.write().await.take()
    }

    /// Note an outbound heartbeat
    pub fn record_heartbeat_sent(&self) {
        *self.last_heartbeat_sent.lock() = Some(Instant::now());
    }

    /// Note an inbound heartbeat
    pub fn record_heartbeat_received(&self) {
        *self.last_heartbeat_received.lock() = Some(Instant::now());
    }

    /// Instant of the last outbound heartbeat
    pub fn last_heartbeat_sent(&self) -> Option<Instant> {
        *self.last_heartbeat_sent.lock()
    }

    /// How long the link has gone without an inbound heartbeat.
    ///
    /// Measured from the later of the last receipt and the moment the link
    /// connected, so a freshly connected link is not instantly stale.
    /// `None` until the link has connected at least once.
    pub fn heartbeat_silence(&self) -> Option<Duration> {
        let connected_at = (*self.connected_at.lock())?;
        let reference = match *self.last_heartbeat_received.lock() {
            Some(received) if received > connected_at => received,
            _ => connected_at,
        };
        Some(reference.elapsed())
    }

    /// Bump the per-link retry counter, returning the new value
    pub fn mark_retry(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the per-link retry counter after a successful recovery
    pub fn reset_retries(&self) {
        self.retries.store(0, Ordering::SeqCst);
    }

    /// Retries attempted since the last successful recovery
    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Suppress health handling for this link (protection-mode cleanup)
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(remote_id = %self.remote_id, "link paused");
        }
    }

    /// Resume health handling.
    ///
    /// Restarts the silence clock so the paused interval is not judged as
    /// heartbeat staleness.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            *self.last_heartbeat_received.lock() = Some(Instant::now());
            info!(remote_id = %self.remote_id, "link resumed");
        }
    }

    /// Whether the link is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Close the link and its transport; safe to call in any state
    pub async fn close(&self) {
        let _ = self.transition(LinkState::Closed);
        let transport = self.transport().await;
        if let Err(e) = transport.close().await {
            debug!(remote_id = %self.remote_id, error = %e, "transport close reported error");
        }
    }
}

/// All live links of one room session, keyed by remote identity
pub struct PeerRegistry {
    links: RwLock<HashMap<String, Arc<PeerLink>>>,
    max_peers: usize,
}

impl PeerRegistry {
    /// Create a registry bounded at `max_peers` links
    pub fn new(max_peers: usize) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    /// Register a link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLink`] if a non-terminal link to the same
    /// identity exists, or a session error at the peer limit.
    pub async fn insert(&self, link: Arc<PeerLink>) -> Result<()> {
        let mut links = self.links.write().await;
        if let Some(existing) = links.get(link.remote_id()) {
            if !existing.state().is_terminal() {
                return Err(Error::DuplicateLink(link.remote_id().to_string()));
            }
        }
        if links.len() >= self.max_peers && !links.contains_key(link.remote_id()) {
            return Err(Error::Session(format!(
                "peer limit ({}) reached",
                self.max_peers
            )));
        }
        links.insert(link.remote_id().to_string(), link);
        Ok(())
    }

    /// Look up the link to `remote_id`
    pub async fn get(&self, remote_id: &str) -> Option<Arc<PeerLink>> {
        self.links.read().await.get(remote_id).cloned()
    }

    /// Remove and return the link to `remote_id`; the caller closes it
    pub async fn remove(&self, remote_id: &str) -> Option<Arc<PeerLink>> {
        self.links.write().await.remove(remote_id)
    }

    /// All registered links
    pub async fn list(&self) -> Vec<Arc<PeerLink>> {
        self.links.read().await.values().cloned().collect()
    }

    /// Number of registered links
    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    /// Whether no links are registered
    pub async fn is_empty(&self) -> bool {
        self.links.read().await.is_empty()
    }

    /// Number of links currently in [`LinkState::Connected`]
    pub async fn connected_count(&self) -> usize {
        self.links
            .read()
            .await
            .values()
            .filter(|l| l.state() == LinkState::Connected)
            .count()
    }

    /// Close every link and empty the registry
    pub async fn clear(&self) {
        let drained: Vec<Arc<PeerLink>> = {
            let mut links = self.links.write().await;
            links.drain().map(|(_, link)| link).collect()
        };
        for link in drained {
            link.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::transport::SdpTransport;

    fn link(remote: &str, role: LinkRole) -> Arc<PeerLink> {
        Arc::new(PeerLink::new(
            remote,
            remote,
            role,
            Arc::new(SdpTransport::new(remote)),
        ))
    }

    #[test]
    fn test_smaller_identity_initiates() {
        assert_eq!(LinkRole::for_pair("a", "b"), LinkRole::Initiator);
        assert_eq!(LinkRole::for_pair("b", "a"), LinkRole::Answerer);
        assert_eq!(LinkRole::for_pair("alice", "bob"), LinkRole::Initiator);
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let link = link("b", LinkRole::Initiator);
        assert_eq!(link.state(), LinkState::New);

        link.transition(LinkState::Negotiating).unwrap();
        link.transition(LinkState::Connected).unwrap();
        link.transition(LinkState::Disconnected).unwrap();
        link.transition(LinkState::Connected).unwrap();
        link.transition(LinkState::Closed).unwrap();
        assert!(link.state().is_terminal());
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected() {
        let link = link("b", LinkRole::Initiator);
        let err = link.transition(LinkState::Connected).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(link.state(), LinkState::New);
    }

    #[tokio::test]
    async fn test_terminal_states_reject_transitions() {
        let link = link("b", LinkRole::Initiator);
        link.transition(LinkState::Negotiating).unwrap();
        link.transition(LinkState::Connected).unwrap();
        link.transition(LinkState::Closed).unwrap();

        assert!(link.transition(LinkState::Connected).is_err());
        assert!(link.transition(LinkState::Failed).is_err());
    }

    #[tokio::test]
    async fn test_close_from_any_live_state() {
        for initial in [LinkState::New, LinkState::Negotiating] {
            let link = link("b", LinkRole::Answerer);
            if initial == LinkState::Negotiating {
                link.transition(LinkState::Negotiating).unwrap();
            }
            link.close().await;
            assert_eq!(link.state(), LinkState::Closed);
        }
    }

    #[tokio::test]
    async fn test_heartbeat_silence_requires_connection() {
        let link = link("b", LinkRole::Initiator);
        assert!(link.heartbeat_silence().is_none());

        link.transition(LinkState::Negotiating).unwrap();
        link.transition(LinkState::Connected).unwrap();
        assert!(link.heartbeat_silence().is_some());

        link.record_heartbeat_received();
        let silence = link.heartbeat_silence().unwrap();
        assert!(silence < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicate_live_link() {
        let registry = PeerRegistry::new(8);
        registry.insert(link("b", LinkRole::Initiator)).await.unwrap();

        let err = registry.insert(link("b", LinkRole::Initiator)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateLink(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_registry_replaces_terminal_link() {
        let registry = PeerRegistry::new(8);
        let stale = link("b", LinkRole::Initiator);
        registry.insert(stale.clone()).await.unwrap();
        stale.close().await;

        registry.insert(link("b", LinkRole::Initiator)).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_registry_enforces_peer_limit() {
        let registry = PeerRegistry::new(1);
        registry.insert(link("b", LinkRole::Initiator)).await.unwrap();

        let err = registry.insert(link("c", LinkRole::Initiator)).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_registry_clear_closes_links() {
        let registry = PeerRegistry::new(8);
        let a = link("b", LinkRole::Initiator);
        let b = link("c", LinkRole::Initiator);
        registry.insert(a.clone()).await.unwrap();
        registry.insert(b.clone()).await.unwrap();

        registry.clear().await;
        assert!(registry.is_empty().await);
        assert_eq!(a.state(), LinkState::Closed);
        assert_eq!(b.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_await_state_resolves_on_transition() {
        let link = link("b", LinkRole::Initiator);
        link.transition(LinkState::Negotiating).unwrap();

        let waiter = {
            let link = link.clone();
            tokio::spawn(async move {
                link.await_state(LinkState::Connected, Duration::from_secs(1)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        link.transition(LinkState::Connected).unwrap();

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_await_state_fails_on_terminal() {
        let link = link("b", LinkRole::Initiator);
        link.transition(LinkState::Negotiating).unwrap();

        let waiter = {
            let link = link.clone();
            tokio::spawn(async move {
                link.await_state(LinkState::Connected, Duration::from_secs(1)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        link.transition(LinkState::Closed).unwrap();

        assert!(waiter.await.unwrap().is_err());
    }
}
