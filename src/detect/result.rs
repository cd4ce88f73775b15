use serde::{Deserialize, Serialize};

/// Body joints in COCO / MoveNet keypoint order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Joint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Joint {
    pub const COUNT: usize = 17;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The same joint on the other side of the body.
    pub fn mirror(self) -> Joint {
        match self {
            Joint::Nose => Joint::Nose,
            Joint::LeftEye => Joint::RightEye,
            Joint::RightEye => Joint::LeftEye,
            Joint::LeftEar => Joint::RightEar,
            Joint::RightEar => Joint::LeftEar,
            Joint::LeftShoulder => Joint::RightShoulder,
            Joint::RightShoulder => Joint::LeftShoulder,
            Joint::LeftElbow => Joint::RightElbow,
            Joint::RightElbow => Joint::LeftElbow,
            Joint::LeftWrist => Joint::RightWrist,
            Joint::RightWrist => Joint::LeftWrist,
            Joint::LeftHip => Joint::RightHip,
            Joint::RightHip => Joint::LeftHip,
            Joint::LeftKnee => Joint::RightKnee,
            Joint::RightKnee => Joint::LeftKnee,
            Joint::LeftAnkle => Joint::RightAnkle,
            Joint::RightAnkle => Joint::LeftAnkle,
        }
    }
}

/// Single keypoint with normalized (0..1) coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    fn is_usable(&self) -> bool {
        self.confidence > 0.0 && self.x.is_finite() && self.y.is_finite()
    }
}

/// All keypoints for one detected body in one frame, indexed by `Joint`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub keypoints: Vec<Keypoint>,
}

impl PoseSample {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// Returns `None` when the joint is missing, has zero confidence,
    /// or carries non-finite coordinates.
    pub fn keypoint(&self, joint: Joint) -> Option<Keypoint> {
        self.keypoints
            .get(joint.index())
            .copied()
            .filter(Keypoint::is_usable)
    }

    pub fn set(&mut self, joint: Joint, keypoint: Keypoint) {
        if self.keypoints.len() < Joint::COUNT {
            self.keypoints.resize(Joint::COUNT, Keypoint::default());
        }
        self.keypoints[joint.index()] = keypoint;
    }

    /// Swap every left/right joint label. Coordinates are untouched.
    pub fn mirrored(&self) -> PoseSample {
        let mut out = PoseSample::default();
        for joint in Joint::ALL {
            if let Some(kp) = self.keypoints.get(joint.index()) {
                out.set(joint.mirror(), *kp);
            }
        }
        out
    }
}

/// Labeled box for one object in one frame. `bbox` is `[x0, y0, x1, y1]`
/// normalized by frame width/height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(label: &str, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Pose estimates, one per detected body.
    #[serde(default)]
    pub poses: Vec<PoseSample>,
    /// Object detections in detector order.
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn objects(detections: Vec<Detection>) -> Self {
        Self {
            poses: Vec::new(),
            detections,
        }
    }

    pub fn poses(poses: Vec<PoseSample>) -> Self {
        Self {
            poses,
            detections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty() && self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_zero_confidence_joints_are_absent() {
        let mut sample = PoseSample::default();
        assert!(sample.keypoint(Joint::LeftHip).is_none());

        sample.set(Joint::LeftHip, Keypoint::new(0.4, 0.5, 0.0));
        assert!(sample.keypoint(Joint::LeftHip).is_none());

        sample.set(Joint::LeftHip, Keypoint::new(0.4, 0.5, 0.9));
        assert_eq!(
            sample.keypoint(Joint::LeftHip),
            Some(Keypoint::new(0.4, 0.5, 0.9))
        );
    }

    #[test]
    fn mirrored_swaps_sides() {
        let mut sample = PoseSample::default();
        sample.set(Joint::LeftKnee, Keypoint::new(0.1, 0.2, 1.0));
        sample.set(Joint::Nose, Keypoint::new(0.5, 0.1, 1.0));

        let mirrored = sample.mirrored();
        assert_eq!(
            mirrored.keypoint(Joint::RightKnee),
            Some(Keypoint::new(0.1, 0.2, 1.0))
        );
        assert!(mirrored.keypoint(Joint::LeftKnee).is_none());
        assert_eq!(
            mirrored.keypoint(Joint::Nose),
            Some(Keypoint::new(0.5, 0.1, 1.0))
        );
    }

    #[test]
    fn detection_result_parses_partial_json() {
        let result: DetectionResult = serde_json::from_str(
            r#"{"detections":[{"label":"person","confidence":0.9,"bbox":[0.1,0.1,0.4,0.9]}]}"#,
        )
        .unwrap();
        assert!(result.poses.is_empty());
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].label, "person");
    }
}
