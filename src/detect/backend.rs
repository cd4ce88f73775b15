use anyhow::Result;

use crate::detect::result::DetectionResult;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Body keypoints (`DetectionResult::poses`).
    Pose,
    /// Labeled boxes (`DetectionResult::detections`).
    Objects,
}

/// Detector backend trait.
///
/// A backend is the only place a model is invoked. It is constructed per
/// session, receives the frame's RGB24 pixels for the duration of one
/// `detect` call, and returns structured detections only.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    ///
    /// Any error is session-fatal; the pipeline does not retry.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
