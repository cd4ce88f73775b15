mod backend;
mod backends;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractObjectBackend, TractPoseBackend};
pub use result::{Detection, DetectionResult, Joint, Keypoint, PoseSample};
