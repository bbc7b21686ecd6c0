//! Adaptive capture-tier selection and the fallback ladder
//!
//! Capture starts at the tier implied by the most recent [`NetworkQuality`]
//! classification and only ever steps down within one acquisition call:
//! full video+audio, reduced video+audio, audio-only, hard failure.

use crate::media::stream::{LocalStream, MediaSource};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Coarse network quality classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    /// Headroom for full-quality video
    Excellent,
    /// Usable but constrained
    Good,
    /// Video likely to starve
    Poor,
    /// No measurement yet
    Unknown,
}

/// Capture-constraint profiles ranked by bandwidth cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintTier {
    /// 1280x720 @ 30fps with audio
    Full,
    /// 640x360 @ 15fps with audio
    Reduced,
    /// No video track
    AudioOnly,
}

impl ConstraintTier {
    /// Tier implied by a quality classification.
    ///
    /// `Unknown` starts optimistic; the fallback ladder absorbs a wrong
    /// guess.
    pub fn for_quality(quality: NetworkQuality) -> ConstraintTier {
        match quality {
            NetworkQuality::Excellent | NetworkQuality::Unknown => ConstraintTier::Full,
            NetworkQuality::Good => ConstraintTier::Reduced,
            NetworkQuality::Poor => ConstraintTier::AudioOnly,
        }
    }

    /// Next cheaper tier, if any
    pub fn step_down(self) -> Option<ConstraintTier> {
        match self {
            ConstraintTier::Full => Some(ConstraintTier::Reduced),
            ConstraintTier::Reduced => Some(ConstraintTier::AudioOnly),
            ConstraintTier::AudioOnly => None,
        }
    }

    /// Concrete capture constraints for this tier
    pub fn profile(self) -> CaptureProfile {
        match self {
            ConstraintTier::Full => CaptureProfile {
                width: 1280,
                height: 720,
                frame_rate: 30,
                video: true,
                audio: true,
            },
            ConstraintTier::Reduced => CaptureProfile {
                width: 640,
                height: 360,
                frame_rate: 15,
                video: true,
                audio: true,
            },
            ConstraintTier::AudioOnly => CaptureProfile {
                width: 0,
                height: 0,
                frame_rate: 0,
                video: false,
                audio: true,
            },
        }
    }
}

/// Concrete constraints handed to the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Requested frame width; 0 when no video is requested
    pub width: u32,
    /// Requested frame height; 0 when no video is requested
    pub height: u32,
    /// Requested frame rate; 0 when no video is requested
    pub frame_rate: u32,
    /// Whether a video track is requested
    pub video: bool,
    /// Whether an audio track is requested
    pub audio: bool,
}

/// Platform-level capture failure
#[derive(Debug, ThisError)]
pub enum CaptureError {
    /// The user denied capture; retrying cannot change this
    #[error("capture permission denied")]
    PermissionDenied,

    /// Device busy, unplugged, or otherwise unavailable
    #[error("capture device failed: {0}")]
    Device(String),

    /// The platform rejected the requested constraints
    #[error("capture negotiation failed: {0}")]
    Negotiation(String),
}

/// Platform capture seam
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open camera + microphone capture at `profile`
    async fn open_camera(
        &self,
        profile: &CaptureProfile,
    ) -> std::result::Result<LocalStream, CaptureError>;

    /// Open a screen-share capture
    async fn open_display(&self) -> std::result::Result<LocalStream, CaptureError>;
}

/// Capture device that always satisfies the requested profile
///
/// Models the platform capture stack the same way the transport layer
/// models session negotiation; a production embedder supplies its own
/// [`CaptureDevice`] instead.
#[derive(Default)]
pub struct SyntheticCaptureDevice;

#[async_trait]
impl CaptureDevice for SyntheticCaptureDevice {
    async fn open_camera(
        &self,
        profile: &CaptureProfile,
    ) -> std::result::Result<LocalStream, CaptureError> {
        let tier = if !profile.video {
            ConstraintTier::AudioOnly
        } else if profile.width >= 1280 {
            ConstraintTier::Full
        } else {
            ConstraintTier::Reduced
        };
        Ok(LocalStream::new(
            MediaSource::Camera,
            tier,
            profile.video,
            profile.audio,
        ))
    }

    async fn open_display(&self) -> std::result::Result<LocalStream, CaptureError> {
        Ok(LocalStream::new(MediaSource::Display, ConstraintTier::Full, true, false))
    }
}

/// Result of a successful acquisition
#[derive(Debug)]
pub struct AcquiredStream {
    /// The live capture stream
    pub stream: Arc<LocalStream>,
    /// Tier the capture succeeded at
    pub tier: ConstraintTier,
    /// Whether a cheaper tier than requested had to be used; callers surface
    /// a degraded-quality notice when set
    pub degraded: bool,
}

/// Serialized, ladder-walking capture acquisition
pub struct AcquisitionPolicy {
    device: Arc<dyn CaptureDevice>,
    /// Held across an entire acquisition call: serializes requests and owns
    /// the currently active capture
    current: Mutex<Option<Arc<LocalStream>>>,
}

impl AcquisitionPolicy {
    /// Create a policy over the given capture device
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            current: Mutex::new(None),
        }
    }

    /// Acquire local capture, walking the fallback ladder downward from the
    /// tier implied by `quality`.
    ///
    /// Any previously held capture is released before each attempt so a
    /// reacquisition never hits a device-lock conflict.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] immediately on denial (never retried);
    /// [`Error::MediaUnavailable`] once every tier has failed.
    pub async fn acquire(
        &self,
        want_video: bool,
        want_audio: bool,
        quality: NetworkQuality,
    ) -> Result<AcquiredStream> {
        let mut current = self.current.lock().await;

        let start = if want_video {
            ConstraintTier::for_quality(quality)
        } else {
            ConstraintTier::AudioOnly
        };

        let mut tier = Some(start);
        while let Some(attempt) = tier {
            if let Some(previous) = current.take() {
                debug!(stream_id = %previous.id(), "releasing previous capture before reacquire");
                previous.release();
            }

            let mut profile = attempt.profile();
            profile.video = profile.video && want_video;
            profile.audio = profile.audio && want_audio;

            match self.device.open_camera(&profile).await {
                Ok(stream) => {
                    let stream = Arc::new(stream);
                    let degraded = attempt != start;
                    if degraded {
                        info!(?attempt, requested = ?start, "capture degraded to cheaper tier");
                    }
                    *current = Some(stream.clone());
                    return Ok(AcquiredStream {
                        stream,
                        tier: attempt,
                        degraded,
                    });
                }
                Err(CaptureError::PermissionDenied) => {
                    warn!("capture permission denied, not retrying");
                    return Err(Error::PermissionDenied);
                }
                Err(e) => {
                    warn!(tier = ?attempt, error = %e, "capture attempt failed, stepping down");
                    tier = attempt.step_down();
                }
            }
        }

        Err(Error::MediaUnavailable(
            "all capture tiers exhausted".to_string(),
        ))
    }

    /// Acquire a screen-share capture, replacing any held stream
    pub async fn acquire_display(&self) -> Result<Arc<LocalStream>> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.release();
        }
        match self.device.open_display().await {
            Ok(stream) => {
                let stream = Arc::new(stream);
                *current = Some(stream.clone());
                Ok(stream)
            }
            Err(CaptureError::PermissionDenied) => Err(Error::PermissionDenied),
            Err(e) => Err(Error::MediaUnavailable(e.to_string())),
        }
    }

    /// Release the held capture, if any
    pub async fn release(&self) {
        if let Some(stream) = self.current.lock().await.take() {
            debug!(stream_id = %stream.id(), "releasing capture");
            stream.release();
        }
    }

    /// The currently held capture stream
    pub async fn active(&self) -> Option<Arc<LocalStream>> {
        self.current.lock().await.clone()
    }
}
