//! Reconnection policy
//!
//! Drives link recovery with capped exponential backoff. At most one
//! reconnect task runs per peer at a time; the per-link retry counter
//! resets on success and a link that exhausts its retries is marked
//! `Failed` and never retried again.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::peer::{LinkState, PeerLink, PeerRegistry};
use crate::Result;

/// Why a link was judged unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// No heartbeat traffic inside the timeout window
    HeartbeatTimeout,
    /// The transport reported `Disconnected` past the grace period
    TransportDisconnected,
    /// The transport reported a hard failure
    TransportFailed,
}

/// Outcome of one reconnect decision, forwarded to the session
#[derive(Debug, Clone)]
pub enum ReconnectUpdate {
    /// An attempt was scheduled after the given backoff delay
    Scheduled {
        peer_id: String,
        attempt: u32,
        delay: Duration,
    },
    /// The link came back and its retry counter was reset
    Recovered { peer_id: String },
    /// Retries are exhausted; the link is now `Failed`
    GaveUp { peer_id: String },
}

/// Re-establishes a single link end to end.
///
/// The session implements this by tearing down the old transport and
/// running a fresh offer/answer exchange over signaling.
#[async_trait::async_trait]
pub trait LinkNegotiator: Send + Sync {
    async fn renegotiate(&self, link: Arc<PeerLink>) -> Result<()>;
}

/// Per-session reconnection driver
pub struct ReconnectPolicy {
    config: MeshConfig,
    registry: Arc<PeerRegistry>,
    negotiator: Arc<dyn LinkNegotiator>,
    in_flight: parking_lot::Mutex<HashMap<String, JoinHandle<()>>>,
    updates: mpsc::UnboundedSender<ReconnectUpdate>,
    weak: Weak<Self>,
}

impl ReconnectPolicy {
    pub fn new(
        config: MeshConfig,
        registry: Arc<PeerRegistry>,
        negotiator: Arc<dyn LinkNegotiator>,
        updates: mpsc::UnboundedSender<ReconnectUpdate>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            registry,
            negotiator,
            in_flight: parking_lot::Mutex::new(HashMap::new()),
            updates,
            weak: weak.clone(),
        })
    }

    /// Backoff before attempt `n` (1-based): `base * 2^(n-1)`, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay();
        let max = self.config.reconnect_max_delay();
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(max)
    }

    /// React to an unhealthy signal for one peer.
    ///
    /// Idempotent while a reconnect task for that peer is already running.
    pub async fn handle_unhealthy(&self, peer_id: &str, reason: UnhealthyReason) {
        let Some(link) = self.registry.get(peer_id).await else {
            debug!(peer_id, "unhealthy signal for unknown peer, ignoring");
            return;
        };
        if link.state().is_terminal() {
            return;
        }
        if link.is_paused() {
            debug!(peer_id, "link paused, reconnect deferred");
            return;
        }
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(peer_id) {
            Some(task) if !task.is_finished() => {
                debug!(peer_id, "reconnect already in flight");
                return;
            }
            Some(_) => {
                in_flight.remove(peer_id);
            }
            None => {}
        }
        info!(peer_id, ?reason, "link unhealthy, starting recovery");

        let weak = self.weak.clone();
        let peer = peer_id.to_string();
        let task = tokio::spawn(async move {
            let Some(policy) = weak.upgrade() else {
                return;
            };
            policy.run_recovery(&peer, link).await;
            policy.in_flight.lock().remove(&peer);
        });
        in_flight.insert(peer_id.to_string(), task);
    }

    async fn run_recovery(&self, peer_id: &str, link: Arc<PeerLink>) {
        loop {
            if link.state().is_terminal() {
                return;
            }
            let attempt = link.mark_retry();
            if attempt > self.config.max_retries {
                warn!(peer_id, "retries exhausted, marking link failed");
                if let Err(e) = link.transition(LinkState::Failed) {
                    debug!(peer_id, error = %e, "link already terminal");
                }
                let _ = self.updates.send(ReconnectUpdate::GaveUp {
                    peer_id: peer_id.to_string(),
                });
                return;
            }

            let delay = self.backoff_delay(attempt);
            debug!(peer_id, attempt, ?delay, "scheduling reconnect attempt");
            let _ = self.updates.send(ReconnectUpdate::Scheduled {
                peer_id: peer_id.to_string(),
                attempt,
                delay,
            });
            tokio::time::sleep(delay).await;

            if link.state().is_terminal() || link.is_paused() {
                return;
            }
            match self.negotiator.renegotiate(Arc::clone(&link)).await {
                Ok(()) => {
                    info!(peer_id, attempt, "link recovered");
                    link.reset_retries();
                    let _ = self.updates.send(ReconnectUpdate::Recovered {
                        peer_id: peer_id.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    warn!(peer_id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Whether a recovery task is currently running for the peer
    pub fn is_recovering(&self, peer_id: &str) -> bool {
        self.in_flight
            .lock()
            .get(peer_id)
            .map_or(false, |task| !task.is_finished())
    }

    /// Abort every in-flight recovery task; used during session teardown
    pub fn abort_all(&self) {
        for (peer_id, task) in self.in_flight.lock().drain() {
            debug!(peer_id, "aborting in-flight reconnect");
            task.abort();
        }
    }
}
