//! Media acquisition policy and stream handles

pub mod policy;
pub mod stream;

pub use policy::{
    AcquiredStream, AcquisitionPolicy, CaptureDevice, CaptureError, CaptureProfile, ConstraintTier,
    NetworkQuality, SyntheticCaptureDevice,
};
pub use stream::{LocalStream, MediaSource, RemoteStream};
