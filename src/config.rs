//! Configuration for the room session core

use crate::media::NetworkQuality;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a [`RoomSession`](crate::session::RoomSession)
///
/// The timing constants carry the empirically tuned defaults of the feature:
/// short disconnect grace, bounded retries, exponential backoff. All of them
/// are plain fields so deployments (and tests) can override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// WebSocket URL of the signaling relay (ws:// or wss://)
    pub relay_url: String,

    /// Maximum peers in one room session (default: 16)
    pub max_peers: usize,

    /// Heartbeat send cadence while the tab is visible (default: 3000ms)
    pub heartbeat_interval_ms: u64,

    /// Heartbeat send cadence while the tab is hidden (default: 1000ms)
    ///
    /// Probing is more frequent when no user-visible symptom would reveal a
    /// dead connection.
    pub hidden_heartbeat_interval_ms: u64,

    /// Silence window after which a link is considered unhealthy (default: 10000ms)
    pub heartbeat_timeout_ms: u64,

    /// Health monitoring pass interval (default: 2000ms)
    pub monitor_interval_ms: u64,

    /// Grace window before a transport-level disconnect triggers
    /// reconnection (default: 4000ms); many disconnects self-heal
    pub disconnect_grace_ms: u64,

    /// First reconnection backoff delay (default: 1000ms)
    pub reconnect_base_delay_ms: u64,

    /// Backoff cap (default: 16000ms)
    pub reconnect_max_delay_ms: u64,

    /// Maximum reconnection attempts before a link is failed (default: 5)
    pub max_retries: u32,

    /// How long renegotiation may take before an attempt counts as failed
    /// (default: 10000ms)
    pub negotiation_timeout_ms: u64,

    /// Continuous visibility required before protection lifts (default: 2000ms)
    pub visibility_grace_ms: u64,

    /// Window after a hide event during which teardown stays suppressed even
    /// if the formal protection state already flipped (default: 5000ms)
    pub recent_hide_window_ms: u64,

    /// Network quality classification used for the first capture attempt
    pub initial_quality: NetworkQuality,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:9900/ws".to_string(),
            max_peers: 16,
            heartbeat_interval_ms: 3_000,
            hidden_heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 10_000,
            monitor_interval_ms: 2_000,
            disconnect_grace_ms: 4_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 16_000,
            max_retries: 5,
            negotiation_timeout_ms: 10_000,
            visibility_grace_ms: 2_000,
            recent_hide_window_ms: 5_000,
            initial_quality: NetworkQuality::Unknown,
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `max_peers` is zero
    /// - `max_retries` is zero
    /// - the heartbeat cadence is not shorter than the heartbeat timeout
    /// - any timing constant is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if self.max_peers == 0 {
            return Err(Error::InvalidConfig("max_peers must be at least 1".to_string()));
        }

        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1".to_string()));
        }

        let timings = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("hidden_heartbeat_interval_ms", self.hidden_heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("reconnect_max_delay_ms", self.reconnect_max_delay_ms),
            ("negotiation_timeout_ms", self.negotiation_timeout_ms),
            ("visibility_grace_ms", self.visibility_grace_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        if self.heartbeat_interval_ms >= self.heartbeat_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be shorter than heartbeat_timeout_ms ({})",
                self.heartbeat_interval_ms, self.heartbeat_timeout_ms
            )));
        }

        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect_base_delay_ms ({}) must not exceed reconnect_max_delay_ms ({})",
                self.reconnect_base_delay_ms, self.reconnect_max_delay_ms
            )));
        }

        Ok(())
    }

    /// Heartbeat cadence for the given visibility
    pub fn heartbeat_interval(&self, hidden: bool) -> Duration {
        if hidden {
            Duration::from_millis(self.hidden_heartbeat_interval_ms)
        } else {
            Duration::from_millis(self.heartbeat_interval_ms)
        }
    }

    /// Heartbeat silence window
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Monitoring pass interval
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Transport-disconnect grace window
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// First backoff delay
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Backoff cap
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Renegotiation deadline for one reconnection attempt
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Continuous-visibility grace before protection lifts
    pub fn visibility_grace(&self) -> Duration {
        Duration::from_millis(self.visibility_grace_ms)
    }

    /// Recent-hide suppression window
    pub fn recent_hide_window(&self) -> Duration {
        Duration::from_millis(self.recent_hide_window_ms)
    }
}
