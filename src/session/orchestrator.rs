//! Room session orchestration
//!
//! [`RoomSession`] ties the layers together: it joins the room over the
//! signaling relay, builds one peer link per remote member, attaches local
//! capture, and runs the health monitor and reconnection policy for the
//! lifetime of the session.
//!
//! Offer direction is deterministic: for any pair the lexicographically
//! smaller identity initiates, the other answers. Both sides create their
//! link eagerly, so the answerer is ready when the offer arrives and
//! simultaneous joins cannot produce duplicate links.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::health::{ConnectionHealthStatus, HealthMonitor};
use crate::media::{AcquisitionPolicy, CaptureDevice, LocalStream, RemoteStream};
use crate::peer::{
    LinkRole, LinkState, PeerLink, PeerRegistry, PeerTransport, TransportFactory, TransportState,
};
use crate::reconnect::{LinkNegotiator, ReconnectPolicy, ReconnectUpdate};
use crate::session::events::SessionEvent;
use crate::session::timers::TimerSet;
use crate::signaling::{self, ServerMessage, SignalingHandle};
use crate::visibility::VisibilityGuard;
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One participant's view of a room
pub struct RoomSession {
    config: MeshConfig,
    room: String,
    user_id: String,
    user_name: String,
    registry: Arc<PeerRegistry>,
    guard: Arc<VisibilityGuard>,
    media: Arc<AcquisitionPolicy>,
    transports: Arc<dyn TransportFactory>,
    signaling: RwLock<Option<SignalingHandle>>,
    reconnect: RwLock<Option<Arc<ReconnectPolicy>>>,
    health: parking_lot::Mutex<Option<watch::Receiver<ConnectionHealthStatus>>>,
    peer_names: parking_lot::Mutex<std::collections::HashMap<String, String>>,
    events: broadcast::Sender<SessionEvent>,
    timers: TimerSet,
    initialized: AtomicBool,
    weak: Weak<Self>,
}

/// Renegotiates one link through the session's signaling connection
struct SessionNegotiator {
    session: Weak<RoomSession>,
}

#[async_trait::async_trait]
impl LinkNegotiator for SessionNegotiator {
    async fn renegotiate(&self, link: Arc<PeerLink>) -> Result<()> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| Error::Session("session dropped".to_string()))?;
        session.renegotiate_link(link).await
    }
}

impl RoomSession {
    /// Create a session for `user_id` in `room`.
    ///
    /// Nothing connects until [`initialize`](Self::initialize) is called.
    pub fn new(
        config: MeshConfig,
        room: &str,
        user_id: &str,
        user_name: &str,
        device: Arc<dyn CaptureDevice>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let guard = VisibilityGuard::new(config.visibility_grace(), config.recent_hide_window());
        let registry = Arc::new(PeerRegistry::new(config.max_peers));
        Ok(Arc::new_cyclic(|weak| Self {
            config,
            room: room.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            registry,
            guard,
            media: Arc::new(AcquisitionPolicy::new(device)),
            transports,
            signaling: RwLock::new(None),
            reconnect: RwLock::new(None),
            health: parking_lot::Mutex::new(None),
            peer_names: parking_lot::Mutex::new(std::collections::HashMap::new()),
            events,
            timers: TimerSet::new(),
            initialized: AtomicBool::new(false),
            weak: weak.clone(),
        }))
    }

    /// Subscribe to the session event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Local participant identity
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Room this session belongs to
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether [`initialize`](Self::initialize) has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// All current peer links
    pub async fn peers(&self) -> Vec<Arc<PeerLink>> {
        self.registry.list().await
    }

    /// Number of links currently connected
    pub async fn connected_peers(&self) -> usize {
        self.registry.connected_count().await
    }

    /// Latest health snapshot, if monitoring has started
    pub fn health_status(&self) -> Option<ConnectionHealthStatus> {
        self.health.lock().as_ref().map(|rx| *rx.borrow())
    }

    /// Watch health snapshots as the monitor publishes them.
    /// `None` until monitoring has started.
    pub fn subscribe_health(&self) -> Option<watch::Receiver<ConnectionHealthStatus>> {
        self.health.lock().clone()
    }

    /// Acquire local capture, connect to the relay, join the room, and start
    /// the background machinery.
    ///
    /// Idempotent: a second call on a live session is a no-op. On failure
    /// the session is left uninitialized and may be retried.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("session already initialized");
            return Ok(());
        }
        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                self.timers.cancel_all();
                self.media.release().await;
                *self.signaling.write().await = None;
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<()> {
        // capture before membership: a participant without media never joins
        let acquired = self
            .media
            .acquire(true, true, self.config.initial_quality)
            .await?;
        self.emit(SessionEvent::LocalStreamReady {
            tier: acquired.tier,
            degraded: acquired.degraded,
        });

        let (handle, server_rx) = signaling::connect(&self.config.relay_url).await?;
        handle.join(&self.room, &self.user_id, &self.user_name)?;
        *self.signaling.write().await = Some(handle);

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let negotiator = Arc::new(SessionNegotiator {
            session: self.weak.clone(),
        });
        let reconnect = ReconnectPolicy::new(
            self.config.clone(),
            Arc::clone(&self.registry),
            negotiator,
            updates_tx,
        );
        *self.reconnect.write().await = Some(Arc::clone(&reconnect));

        let (unhealthy_tx, unhealthy_rx) = mpsc::unbounded_channel();
        let (monitor, health_rx) = HealthMonitor::spawn(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.guard),
            unhealthy_tx,
        );
        *self.health.lock() = Some(health_rx);
        self.timers.register("health-monitor", monitor);

        self.spawn_unhealthy_pump(unhealthy_rx, reconnect);
        self.spawn_reconnect_pump(updates_rx);
        self.spawn_signaling_pump(server_rx);

        info!(room = %self.room, user_id = %self.user_id, "session initialized");
        Ok(())
    }

    fn spawn_unhealthy_pump(
        &self,
        mut rx: mpsc::UnboundedReceiver<(String, crate::reconnect::UnhealthyReason)>,
        reconnect: Arc<ReconnectPolicy>,
    ) {
        let handle = tokio::spawn(async move {
            while let Some((peer_id, reason)) = rx.recv().await {
                reconnect.handle_unhealthy(&peer_id, reason).await;
            }
        });
        self.timers.register("unhealthy-pump", handle);
    }

    fn spawn_reconnect_pump(&self, mut rx: mpsc::UnboundedReceiver<ReconnectUpdate>) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let event = match update {
                    ReconnectUpdate::Scheduled {
                        peer_id,
                        attempt,
                        delay,
                    } => SessionEvent::ReconnectScheduled {
                        peer_id,
                        attempt,
                        delay,
                    },
                    ReconnectUpdate::Recovered { peer_id } => {
                        SessionEvent::PeerRecovered { peer_id }
                    }
                    ReconnectUpdate::GaveUp { peer_id } => SessionEvent::PeerFailed { peer_id },
                };
                let _ = events.send(event);
            }
        });
        self.timers.register("reconnect-pump", handle);
    }

    fn spawn_signaling_pump(&self, mut rx: mpsc::UnboundedReceiver<ServerMessage>) {
        let weak = self.weak.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = session.handle_server_message(msg).await {
                    warn!(error = %e, "failed to handle relay message");
                }
            }
            debug!("signaling pump terminated");
        });
        self.timers.register("signaling-pump", handle);
    }

    async fn handle_server_message(&self, msg: ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::RoomParticipants { participants } => {
                for p in participants {
                    self.peer_names
                        .lock()
                        .insert(p.user_id.clone(), p.user_name.clone());
                    self.emit(SessionEvent::PeerJoined {
                        peer_id: p.user_id.clone(),
                        peer_name: p.user_name.clone(),
                    });
                    self.connect_to_peer(&p.user_id, &p.user_name).await?;
                }
                Ok(())
            }
            ServerMessage::UserJoined { user_id, user_name } => {
                self.peer_names
                    .lock()
                    .insert(user_id.clone(), user_name.clone());
                self.emit(SessionEvent::PeerJoined {
                    peer_id: user_id.clone(),
                    peer_name: user_name.clone(),
                });
                self.connect_to_peer(&user_id, &user_name).await
            }
            ServerMessage::UserLeft { user_id } => self.handle_user_left(&user_id).await,
            ServerMessage::Offer { from, sdp, .. } => self.handle_offer(&from, sdp).await,
            ServerMessage::Answer { from, sdp, .. } => self.handle_answer(&from, sdp).await,
            ServerMessage::IceCandidate {
                from, candidate, ..
            } => self.handle_candidate(&from, candidate).await,
            ServerMessage::RoomMessage {
                user_id,
                message,
                timestamp,
            } => {
                self.emit(SessionEvent::Chat {
                    user_id,
                    message,
                    timestamp,
                });
                Ok(())
            }
        }
    }

    /// Build the link to `peer_id` and, when this side is the initiator,
    /// start negotiation.
    async fn connect_to_peer(&self, peer_id: &str, peer_name: &str) -> Result<()> {
        if peer_id == self.user_id {
            return Ok(());
        }
        if let Some(existing) = self.registry.get(peer_id).await {
            if !existing.state().is_terminal() {
                debug!(peer_id, "link already exists");
                return Ok(());
            }
            // rejoin after a failed or closed link: start fresh
            self.registry.remove(peer_id).await;
            self.timers.cancel(&format!("link-state:{}", peer_id));
        }

        let role = LinkRole::for_pair(&self.user_id, peer_id);
        let transport = self.transports.create(peer_id);
        let link = Arc::new(PeerLink::new(peer_id, peer_name, role, transport));
        match self.registry.insert(Arc::clone(&link)).await {
            Ok(()) => {}
            Err(Error::DuplicateLink(_)) => return Ok(()),
            Err(e) => {
                warn!(peer_id, error = %e, "cannot add peer link");
                return Err(e);
            }
        }

        self.watch_link_state(&link);
        link.transition(LinkState::Negotiating)?;
        if let Some(stream) = self.media.active().await {
            link.attach_local_stream(stream).await;
        }

        if role == LinkRole::Initiator {
            let sdp = link.transport().await.create_offer().await?;
            self.signaling_handle().await?.send_offer(&self.user_id, peer_id, sdp)?;
            debug!(peer_id, "offer sent");
        }
        Ok(())
    }

    fn watch_link_state(&self, link: &Arc<PeerLink>) {
        let mut rx = link.subscribe_state();
        let events = self.events.clone();
        let peer_id = link.remote_id().to_string();
        let name = format!("link-state:{}", peer_id);
        let handle = tokio::spawn(async move {
            loop {
                let state = *rx.borrow_and_update();
                let _ = events.send(SessionEvent::LinkStateChanged {
                    peer_id: peer_id.clone(),
                    state,
                });
                if state.is_terminal() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        self.timers.register(&name, handle);
    }

    async fn handle_user_left(&self, peer_id: &str) -> Result<()> {
        self.peer_names.lock().remove(peer_id);
        if let Some(link) = self.registry.remove(peer_id).await {
            if link.take_remote_stream().await.is_some() {
                self.emit(SessionEvent::RemoteStreamRemoved {
                    peer_id: peer_id.to_string(),
                });
            }
            link.close().await;
        }
        self.timers.cancel(&format!("link-state:{}", peer_id));
        self.emit(SessionEvent::PeerLeft {
            peer_id: peer_id.to_string(),
        });
        Ok(())
    }

    async fn handle_offer(&self, from: &str, sdp: String) -> Result<()> {
        if self.registry.get(from).await.is_none() {
            // offer raced ahead of the join notification
            let name = self
                .peer_names
                .lock()
                .get(from)
                .cloned()
                .unwrap_or_else(|| from.to_string());
            self.connect_to_peer(from, &name).await?;
        }
        let link = self
            .registry
            .get(from)
            .await
            .ok_or_else(|| Error::PeerNotFound(from.to_string()))?;

        match link.state() {
            LinkState::Negotiating => {
                // mutual offers: the smaller identity's offer wins
                if link.role() == LinkRole::Initiator
                    && link.transport().await.state().await == TransportState::Connecting
                {
                    debug!(from, "ignoring crossed offer, ours takes precedence");
                    return Ok(());
                }
            }
            LinkState::Connected => {
                debug!(from, "remote renegotiation of a connected link");
                self.swap_transport(&link).await;
                link.transition(LinkState::Disconnected)?;
                link.transition(LinkState::Negotiating)?;
            }
            LinkState::Disconnected => {
                self.swap_transport(&link).await;
                link.transition(LinkState::Negotiating)?;
            }
            state => {
                warn!(from, ?state, "dropping offer for link in unusable state");
                return Ok(());
            }
        }

        let transport = link.transport().await;
        let answer = transport.create_answer(sdp).await?;
        self.signaling_handle().await?.send_answer(&self.user_id, from, answer)?;
        link.transition(LinkState::Connected)?;
        self.announce_remote_stream(&link).await;
        Ok(())
    }

    async fn handle_answer(&self, from: &str, sdp: String) -> Result<()> {
        let link = self
            .registry
            .get(from)
            .await
            .ok_or_else(|| Error::PeerNotFound(from.to_string()))?;
        link.transport().await.accept_answer(sdp).await?;
        link.transition(LinkState::Connected)?;
        self.announce_remote_stream(&link).await;
        Ok(())
    }

    async fn handle_candidate(&self, from: &str, candidate: String) -> Result<()> {
        match self.registry.get(from).await {
            Some(link) => link.transport().await.add_ice_candidate(candidate).await,
            None => {
                debug!(from, "dropping candidate for unknown peer");
                Ok(())
            }
        }
    }

    /// Close the stale transport and swap in a fresh one from the factory.
    /// The remote stream rode on the stale transport, so it goes away too.
    async fn swap_transport(&self, link: &Arc<PeerLink>) {
        let stale = link.transport().await;
        if let Err(e) = stale.close().await {
            debug!(peer_id = link.remote_id(), error = %e, "stale transport close reported error");
        }
        if link.take_remote_stream().await.is_some() {
            self.emit(SessionEvent::RemoteStreamRemoved {
                peer_id: link.remote_id().to_string(),
            });
        }
        link.replace_transport(self.transports.create(link.remote_id())).await;
    }

    async fn announce_remote_stream(&self, link: &Arc<PeerLink>) {
        let stream = Arc::new(RemoteStream::new(link.remote_id(), true, true));
        link.set_remote_stream(Arc::clone(&stream)).await;
        self.emit(SessionEvent::RemoteStreamAdded {
            peer_id: link.remote_id().to_string(),
            stream,
        });
    }

    /// Tear down and rebuild one link; called by the reconnection policy.
    ///
    /// The initiator re-offers; the answerer re-arms and waits for the
    /// remote offer. Success is the link reaching `Connected` within the
    /// negotiation timeout.
    async fn renegotiate_link(&self, link: Arc<PeerLink>) -> Result<()> {
        let peer_id = link.remote_id().to_string();
        info!(peer_id, role = ?link.role(), "renegotiating link");

        self.swap_transport(&link).await;
        if link.state() == LinkState::Connected {
            link.transition(LinkState::Disconnected)?;
        }
        if link.state() != LinkState::Negotiating {
            link.transition(LinkState::Negotiating)?;
        }
        if let Some(stream) = self.media.active().await {
            link.attach_local_stream(stream).await;
        }

        if link.role() == LinkRole::Initiator {
            let sdp = link.transport().await.create_offer().await?;
            self.signaling_handle().await?.send_offer(&self.user_id, &peer_id, sdp)?;
        }
        link.await_state(LinkState::Connected, self.config.negotiation_timeout())
            .await
    }

    /// Reacquire local capture with the given track selection and attach it
    /// to every existing link.
    ///
    /// [`initialize`](Self::initialize) already acquires full capture; this
    /// is for changing the selection afterwards (for example dropping to
    /// audio-only by choice).
    pub async fn start_local_media(
        &self,
        want_video: bool,
        want_audio: bool,
    ) -> Result<Arc<LocalStream>> {
        let acquired = self
            .media
            .acquire(want_video, want_audio, self.config.initial_quality)
            .await?;
        for link in self.registry.list().await {
            link.attach_local_stream(Arc::clone(&acquired.stream)).await;
        }
        self.emit(SessionEvent::LocalStreamReady {
            tier: acquired.tier,
            degraded: acquired.degraded,
        });
        Ok(acquired.stream)
    }

    /// Send a chat message to the room
    pub async fn send_chat(&self, message: &str) -> Result<()> {
        self.signaling_handle()
            .await?
            .send_chat(&self.user_id, message.to_string())
    }

    /// Toggle the local video track
    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        let stream = self.active_stream().await?;
        stream.set_video_enabled(enabled);
        Ok(())
    }

    /// Toggle the local audio track
    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        let stream = self.active_stream().await?;
        stream.set_audio_enabled(enabled);
        Ok(())
    }

    /// Replace the camera capture with a screen share
    pub async fn start_screen_share(&self) -> Result<Arc<LocalStream>> {
        let stream = self.media.acquire_display().await?;
        for link in self.registry.list().await {
            link.attach_local_stream(Arc::clone(&stream)).await;
        }
        Ok(stream)
    }

    /// End the screen share and return to camera capture
    pub async fn stop_screen_share(&self) -> Result<()> {
        let acquired = self
            .media
            .acquire(true, true, self.config.initial_quality)
            .await?;
        for link in self.registry.list().await {
            link.attach_local_stream(Arc::clone(&acquired.stream)).await;
        }
        self.emit(SessionEvent::LocalStreamReady {
            tier: acquired.tier,
            degraded: acquired.degraded,
        });
        Ok(())
    }

    /// The tab hosting this session was hidden
    pub fn tab_hidden(&self) {
        self.guard.tab_hidden();
    }

    /// The hosting window lost focus
    pub fn window_blurred(&self) {
        self.guard.window_blurred();
    }

    /// The tab became visible and focused again
    pub fn tab_visible(&self) {
        self.guard.tab_visible();
    }

    /// Whether teardown is currently suppressed
    pub fn is_protected(&self) -> bool {
        self.guard.is_protected()
    }

    /// Leave the room and release every resource.
    ///
    /// While visibility protection holds, teardown is refused: links are
    /// paused instead and the session stays alive.
    pub async fn leave_room(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.guard.is_protected() {
            warn!(room = %self.room, "leave suppressed while visibility protection holds");
            for link in self.registry.list().await {
                link.pause();
            }
            return Err(Error::Session(
                "leave suppressed: session is visibility-protected".to_string(),
            ));
        }
        self.teardown().await
    }

    /// Leave unconditionally; a deliberate user action that overrides
    /// visibility protection first.
    pub async fn force_leave_room(&self) -> Result<()> {
        self.guard.force_allow_action();
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.teardown().await
    }

    async fn teardown(&self) -> Result<()> {
        info!(room = %self.room, user_id = %self.user_id, "leaving room");
        let handle = self.signaling.write().await.take();
        if let Some(handle) = &handle {
            if let Err(e) = handle.leave(&self.room, &self.user_id) {
                debug!(error = %e, "relay connection already gone during leave");
            }
        }
        self.timers.cancel_all();
        if let Some(reconnect) = self.reconnect.write().await.take() {
            reconnect.abort_all();
        }
        *self.health.lock() = None;
        self.registry.clear().await;
        self.media.release().await;
        self.peer_names.lock().clear();
        drop(handle);
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn signaling_handle(&self) -> Result<SignalingHandle> {
        self.signaling
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Session("not connected to the relay".to_string()))
    }

    async fn active_stream(&self) -> Result<Arc<LocalStream>> {
        self.media
            .active()
            .await
            .ok_or_else(|| Error::Session("no active local capture".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticCaptureDevice;
    use crate::peer::SdpTransportFactory;
    use crate::signaling::relay::{router, RelayState};
    use std::time::Duration;

    async fn spawn_relay() -> String {
        let state = RelayState::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    /// Long cadences so no monitor pass interferes with the scenario
    fn quiet_config(url: &str) -> MeshConfig {
        MeshConfig {
            relay_url: url.to_string(),
            heartbeat_interval_ms: 60_000,
            hidden_heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 120_000,
            monitor_interval_ms: 60_000,
            visibility_grace_ms: 50,
            recent_hide_window_ms: 100,
            ..MeshConfig::default()
        }
    }

    fn session(config: MeshConfig, user_id: &str, user_name: &str) -> Arc<RoomSession> {
        RoomSession::new(
            config,
            "study-room",
            user_id,
            user_name,
            Arc::new(SyntheticCaptureDevice),
            Arc::new(SdpTransportFactory),
        )
        .unwrap()
    }

    async fn await_connected(s: &Arc<RoomSession>, peers: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if s.connected_peers().await == peers {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("peers never connected");
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let url = spawn_relay().await;
        let s = session(quiet_config(&url), "a", "Alice");

        s.initialize().await.unwrap();
        s.initialize().await.unwrap();

        assert!(s.is_initialized());
        assert!(s.media.active().await.is_some());
        s.force_leave_room().await.unwrap();
    }

    #[tokio::test]
    async fn test_pair_connects_with_single_deterministic_initiator() {
        let url = spawn_relay().await;
        let a = session(quiet_config(&url), "a", "Alice");
        let b = session(quiet_config(&url), "b", "Bob");

        a.initialize().await.unwrap();
        b.initialize().await.unwrap();

        await_connected(&a, 1).await;
        await_connected(&b, 1).await;

        let a_links = a.peers().await;
        let b_links = b.peers().await;
        assert_eq!(a_links.len(), 1);
        assert_eq!(b_links.len(), 1);
        assert_eq!(a_links[0].role(), LinkRole::Initiator);
        assert_eq!(b_links[0].role(), LinkRole::Answerer);

        a.force_leave_room().await.unwrap();
        b.force_leave_room().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_peer() {
        let url = spawn_relay().await;
        let a = session(quiet_config(&url), "a", "Alice");
        let b = session(quiet_config(&url), "b", "Bob");

        a.initialize().await.unwrap();
        b.initialize().await.unwrap();
        await_connected(&a, 1).await;
        let mut events = b.subscribe();

        a.leave_room().await.unwrap();
        assert!(!a.is_initialized());

        let (stream_removed, left) = tokio::time::timeout(Duration::from_secs(5), async {
            let mut removed = false;
            loop {
                match events.recv().await {
                    Ok(SessionEvent::RemoteStreamRemoved { peer_id }) => {
                        assert_eq!(peer_id, "a");
                        removed = true;
                    }
                    Ok(SessionEvent::PeerLeft { peer_id }) => return (removed, peer_id),
                    Ok(_) => continue,
                    Err(e) => panic!("event stream broke: {}", e),
                }
            }
        })
        .await
        .expect("never saw PeerLeft");
        assert!(stream_removed, "remote stream must be retired before PeerLeft");
        assert_eq!(left, "a");
        assert_eq!(b.peers().await.len(), 0);

        b.force_leave_room().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_subscription_tracks_connected_links() {
        let url = spawn_relay().await;
        let mut config = quiet_config(&url);
        config.monitor_interval_ms = 20;
        let a = session(config, "a", "Alice");
        let b = session(quiet_config(&url), "b", "Bob");

        assert!(a.subscribe_health().is_none());
        a.initialize().await.unwrap();
        b.initialize().await.unwrap();
        await_connected(&a, 1).await;

        let mut health = a.subscribe_health().expect("monitor not running");
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                health.changed().await.unwrap();
                let snapshot = *health.borrow_and_update();
                if snapshot.connected == 1 && snapshot.total == 1 {
                    return;
                }
            }
        })
        .await
        .expect("health never reported the connected link");

        let snapshot = a.health_status().expect("monitor not running");
        assert!(snapshot.passes >= 1);
        assert!(!snapshot.recovering);

        a.force_leave_room().await.unwrap();
        b.force_leave_room().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_suppressed_while_protected() {
        let url = spawn_relay().await;
        let a = session(quiet_config(&url), "a", "Alice");
        let b = session(quiet_config(&url), "b", "Bob");
        a.initialize().await.unwrap();
        b.initialize().await.unwrap();
        await_connected(&a, 1).await;

        a.tab_hidden();
        let err = a.leave_room().await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(a.is_initialized());
        // pause-only cleanup: links paused, capture kept
        assert!(a.peers().await[0].is_paused());
        assert!(a.media.active().await.is_some());

        // an explicit user action still gets out
        a.force_leave_room().await.unwrap();
        assert!(!a.is_initialized());
        assert!(a.media.active().await.is_none());

        b.force_leave_room().await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_round_trip_through_relay() {
        let url = spawn_relay().await;
        let a = session(quiet_config(&url), "a", "Alice");
        let b = session(quiet_config(&url), "b", "Bob");
        a.initialize().await.unwrap();
        b.initialize().await.unwrap();
        await_connected(&a, 1).await;
        let mut events = b.subscribe();

        a.send_chat("see you at the library").await.unwrap();

        let (from, body) = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Chat {
                        user_id, message, ..
                    }) => return (user_id, message),
                    Ok(_) => continue,
                    Err(e) => panic!("event stream broke: {}", e),
                }
            }
        })
        .await
        .expect("never saw chat");
        assert_eq!(from, "a");
        assert_eq!(body, "see you at the library");

        a.force_leave_room().await.unwrap();
        b.force_leave_room().await.unwrap();
    }
}
