//! Geometric pose matching over body keypoints.
//!
//! The target pose is an asymmetric lunge/kick: one leg straight, the other
//! sharply bent, one arm tucked and the other raised away from the body. The
//! rule accepts the pose facing either direction.

use serde::Deserialize;

use crate::detect::{Joint, Keypoint, PoseSample};

/// Unsigned planar angle at `b` between rays `b -> a` and `b -> c`, in
/// degrees within `[0, 180]`. Depth and confidence are ignored.
pub fn angle(a: Keypoint, b: Keypoint, c: Keypoint) -> f32 {
    let radians = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let mut degrees = radians.to_degrees().abs();
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    degrees.clamp(0.0, 180.0)
}

/// The four joint angles the rule looks at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointAngles {
    /// hip - knee - ankle
    pub left_leg: f32,
    pub right_leg: f32,
    /// shoulder - elbow - hip
    pub left_arm: f32,
    pub right_arm: f32,
}

impl JointAngles {
    /// `None` when any of the ten required joints is missing.
    pub fn from_sample(sample: &PoseSample) -> Option<Self> {
        let kp = |joint| sample.keypoint(joint);
        Some(Self {
            left_leg: angle(
                kp(Joint::LeftHip)?,
                kp(Joint::LeftKnee)?,
                kp(Joint::LeftAnkle)?,
            ),
            right_leg: angle(
                kp(Joint::RightHip)?,
                kp(Joint::RightKnee)?,
                kp(Joint::RightAnkle)?,
            ),
            left_arm: angle(
                kp(Joint::LeftShoulder)?,
                kp(Joint::LeftElbow)?,
                kp(Joint::LeftHip)?,
            ),
            right_arm: angle(
                kp(Joint::RightShoulder)?,
                kp(Joint::RightElbow)?,
                kp(Joint::RightHip)?,
            ),
        })
    }
}

/// Angle thresholds for the target pose, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoseRule {
    /// The straight leg must exceed this.
    pub straight_leg_min: f32,
    /// The bent leg must stay below this.
    pub bent_leg_max: f32,
    /// The tucked arm must stay below this.
    pub tucked_arm_max: f32,
    /// The raised arm must exceed this.
    pub raised_arm_min: f32,
}

impl Default for PoseRule {
    fn default() -> Self {
        Self {
            straight_leg_min: 150.0,
            bent_leg_max: 70.0,
            tucked_arm_max: 90.0,
            raised_arm_min: 90.0,
        }
    }
}

impl PoseRule {
    pub fn matches(&self, angles: &JointAngles) -> bool {
        self.one_side(
            angles.left_leg,
            angles.right_leg,
            angles.left_arm,
            angles.right_arm,
        ) || self.one_side(
            angles.right_leg,
            angles.left_leg,
            angles.right_arm,
            angles.left_arm,
        )
    }

    /// Missing joints never match.
    pub fn evaluate(&self, sample: &PoseSample) -> bool {
        JointAngles::from_sample(sample).is_some_and(|angles| self.matches(&angles))
    }

    fn one_side(&self, straight_leg: f32, bent_leg: f32, tucked_arm: f32, raised_arm: f32) -> bool {
        straight_leg > self.straight_leg_min
            && bent_leg < self.bent_leg_max
            && tucked_arm < self.tucked_arm_max
            && raised_arm > self.raised_arm_min
    }
}

/// `PoseRule::default().evaluate(sample)`.
pub fn is_target_pose(sample: &PoseSample) -> bool {
    PoseRule::default().evaluate(sample)
}
