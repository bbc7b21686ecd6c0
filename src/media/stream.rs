//! Local and remote media stream handles

use crate::media::policy::ConstraintTier;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a local stream's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    /// Camera + microphone capture
    Camera,
    /// Screen-share capture
    Display,
}

/// The local capture stream, shared read-only with every peer link.
///
/// Track-enabled flags are mutated exclusively by the orchestrator; toggling
/// them does not renegotiate connections.
#[derive(Debug)]
pub struct LocalStream {
    id: String,
    source: MediaSource,
    tier: ConstraintTier,
    has_video: bool,
    has_audio: bool,
    video_enabled: AtomicBool,
    audio_enabled: AtomicBool,
    released: AtomicBool,
}

impl LocalStream {
    /// Create a stream handle for a successful capture
    pub fn new(source: MediaSource, tier: ConstraintTier, has_video: bool, has_audio: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            tier,
            has_video,
            has_audio,
            video_enabled: AtomicBool::new(has_video),
            audio_enabled: AtomicBool::new(has_audio),
            released: AtomicBool::new(false),
        }
    }

    /// Unique stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capture source backing this stream
    pub fn source(&self) -> MediaSource {
        self.source
    }

    /// Constraint tier the capture succeeded at
    pub fn tier(&self) -> ConstraintTier {
        self.tier
    }

    /// Whether the stream carries a video track
    pub fn has_video(&self) -> bool {
        self.has_video
    }

    /// Whether the stream carries an audio track
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Enable or disable the video track
    pub fn set_video_enabled(&self, enabled: bool) {
        if self.has_video {
            self.video_enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Enable or disable the audio track
    pub fn set_audio_enabled(&self, enabled: bool) {
        if self.has_audio {
            self.audio_enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Whether the video track is live
    pub fn video_enabled(&self) -> bool {
        self.has_video && self.video_enabled.load(Ordering::SeqCst)
    }

    /// Whether the audio track is live
    pub fn audio_enabled(&self) -> bool {
        self.has_audio && self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Release the underlying capture devices. Idempotent.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Whether the capture devices have been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// A remote participant's negotiated stream, shared with the UI consumer
#[derive(Debug, Clone)]
pub struct RemoteStream {
    id: String,
    peer_id: String,
    has_video: bool,
    has_audio: bool,
}

impl RemoteStream {
    /// Record a stream negotiated with `peer_id`
    pub fn new(peer_id: &str, has_video: bool, has_audio: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer_id: peer_id.to_string(),
            has_video,
            has_audio,
        }
    }

    /// Unique stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The participant this stream belongs to
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Whether the stream carries video
    pub fn has_video(&self) -> bool {
        self.has_video
    }

    /// Whether the stream carries audio
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }
}
