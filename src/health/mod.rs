//! Connection health monitoring
//!
//! A single periodic task sends heartbeats over every connected link,
//! watches for heartbeat silence and transport-level disconnects, and
//! hands unhealthy links to the reconnection policy. A heartbeat timeout
//! while the tab is hidden pauses the link instead of reporting it, and the
//! link resumes on a later visible pass; the transport can still report
//! hard failures in either state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::MeshConfig;
use crate::peer::{LinkState, PeerLink, PeerRegistry, TransportState};
use crate::reconnect::UnhealthyReason;
use crate::visibility::VisibilityGuard;

/// Frame exchanged on the auxiliary heartbeat channel of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HeartbeatFrame {
    /// Liveness probe
    Ping { seq: u64, sent_at_ms: u64 },
    /// Echo of a received probe
    Ack { seq: u64 },
}

/// Snapshot of link health, published after every monitor pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionHealthStatus {
    /// Links currently in the `Connected` state
    pub connected: usize,
    /// Links judged unhealthy on this pass
    pub unhealthy: usize,
    /// All non-terminal links
    pub total: usize,
    /// Sum of per-link retry counters
    pub retries: u32,
    /// Whether any link is mid-recovery
    pub recovering: bool,
    /// Monitor passes completed so far
    pub passes: u64,
}

/// Process a heartbeat frame received on a link's auxiliary channel.
///
/// A probe updates the last-received timestamp and is answered with an ack;
/// an ack only updates the timestamp. Acks are observational and never feed
/// back into health judgements. Production drivers call this from their
/// channel receive path.
pub async fn handle_frame(link: &PeerLink, frame: HeartbeatFrame) -> crate::Result<()> {
    link.record_heartbeat_received();
    if let HeartbeatFrame::Ping { seq, .. } = frame {
        trace!(peer_id = link.remote_id(), seq, "heartbeat probe received");
        link.transport()
            .await
            .send_heartbeat(HeartbeatFrame::Ack { seq })
            .await?;
    }
    Ok(())
}

/// Periodic health monitor for one session
pub struct HealthMonitor;

impl HealthMonitor {
    /// Start the monitor task.
    ///
    /// Unhealthy links are reported on `unhealthy_tx`; the returned watch
    /// receiver carries a status snapshot refreshed every pass. Abort the
    /// handle to stop monitoring.
    pub fn spawn(
        config: MeshConfig,
        registry: Arc<PeerRegistry>,
        guard: Arc<VisibilityGuard>,
        unhealthy_tx: mpsc::UnboundedSender<(String, UnhealthyReason)>,
    ) -> (JoinHandle<()>, watch::Receiver<ConnectionHealthStatus>) {
        let (status_tx, status_rx) = watch::channel(ConnectionHealthStatus::default());
        let handle = tokio::spawn(async move {
            run(config, registry, guard, unhealthy_tx, status_tx).await;
        });
        (handle, status_rx)
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

async fn run(
    config: MeshConfig,
    registry: Arc<PeerRegistry>,
    guard: Arc<VisibilityGuard>,
    unhealthy_tx: mpsc::UnboundedSender<(String, UnhealthyReason)>,
    status_tx: watch::Sender<ConnectionHealthStatus>,
) {
    let mut seq: HashMap<String, u64> = HashMap::new();
    let mut last_beat: HashMap<String, Instant> = HashMap::new();
    let mut disconnect_seen: HashMap<String, Instant> = HashMap::new();
    let mut passes: u64 = 0;

    loop {
        tokio::time::sleep(config.monitor_interval()).await;
        passes += 1;

        let hidden = guard.is_hidden();
        let beat_every = config.heartbeat_interval(hidden);
        let links = registry.list().await;
        let mut connected = 0;
        let mut unhealthy = 0;
        let mut total = 0;
        let mut retries = 0u32;

        for link in &links {
            let peer_id = link.remote_id().to_string();
            let state = link.state();
            if state.is_terminal() {
                seq.remove(&peer_id);
                last_beat.remove(&peer_id);
                disconnect_seen.remove(&peer_id);
                continue;
            }
            total += 1;
            retries = retries.saturating_add(link.retry_count());
            if link.is_paused() {
                if hidden {
                    disconnect_seen.remove(&peer_id);
                    continue;
                }
                // visible again: resume whatever state the transport is in
                // and let this pass classify the link normally
                link.resume();
            }
            if state == LinkState::Connected {
                connected += 1;

                let due = last_beat
                    .get(&peer_id)
                    .map_or(true, |at| at.elapsed() >= beat_every);
                if due {
                    let n = seq.entry(peer_id.clone()).or_insert(0);
                    *n += 1;
                    let frame = HeartbeatFrame::Ping {
                        seq: *n,
                        sent_at_ms: now_ms(),
                    };
                    let transport = link.transport().await;
                    match transport.send_heartbeat(frame).await {
                        Ok(()) => {
                            link.record_heartbeat_sent();
                            last_beat.insert(peer_id.clone(), Instant::now());
                            trace!(peer_id, seq = *n, "heartbeat sent");
                        }
                        Err(e) => debug!(peer_id, error = %e, "heartbeat send failed"),
                    }
                }

                if let Some(silence) = link.heartbeat_silence() {
                    if silence > config.heartbeat_timeout() {
                        if hidden {
                            // no teardown while backgrounded; the link is
                            // paused and resumed on a later visible pass
                            debug!(
                                peer_id,
                                ?silence,
                                "heartbeat silence while tab hidden, pausing link"
                            );
                            link.pause();
                        } else {
                            warn!(peer_id, ?silence, "heartbeat timeout");
                            unhealthy += 1;
                            let _ = unhealthy_tx
                                .send((peer_id.clone(), UnhealthyReason::HeartbeatTimeout));
                        }
                    }
                }
            }

            let transport = link.transport().await;
            match transport.state().await {
                TransportState::Failed => {
                    disconnect_seen.remove(&peer_id);
                    warn!(peer_id, "transport failed");
                    unhealthy += 1;
                    let _ = unhealthy_tx.send((peer_id, UnhealthyReason::TransportFailed));
                }
                TransportState::Disconnected => {
                    let first_seen = *disconnect_seen.entry(peer_id.clone()).or_insert_with(Instant::now);
                    if first_seen.elapsed() >= config.disconnect_grace() {
                        warn!(peer_id, "transport disconnected past grace period");
                        unhealthy += 1;
                        disconnect_seen.remove(&peer_id);
                        let _ =
                            unhealthy_tx.send((peer_id, UnhealthyReason::TransportDisconnected));
                    }
                }
                _ => {
                    disconnect_seen.remove(&peer_id);
                }
            }
        }

        status_tx.send_replace(ConnectionHealthStatus {
            connected,
            unhealthy,
            total,
            retries,
            recovering: retries > 0,
            passes,
        });
    }
}
