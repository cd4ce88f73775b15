use std::time::Duration;

use super::{Decision, DecisionStrategy, Reaction};
use crate::detect::{DetectionCapability, DetectionResult};
use crate::pose::{JointAngles, PoseRule};

/// Fires `PoseMatched` on the frame where the target pose starts.
///
/// Holding the pose does not re-fire; the pose must be lost for a frame
/// before it can trigger again.
pub struct PoseTrigger {
    rule: PoseRule,
    matched: bool,
}

impl PoseTrigger {
    pub fn new(rule: PoseRule) -> Self {
        Self {
            rule,
            matched: false,
        }
    }
}

impl DecisionStrategy for PoseTrigger {
    fn name(&self) -> &'static str {
        "pose"
    }

    fn required_capability(&self) -> DetectionCapability {
        DetectionCapability::Pose
    }

    fn decide(&mut self, result: &DetectionResult, timestamp: Duration) -> Decision {
        let matched = result.poses.iter().any(|pose| self.rule.evaluate(pose));
        let mut reactions = Vec::new();
        if matched && !self.matched {
            if let Some(angles) = result.poses.iter().find_map(JointAngles::from_sample) {
                log::debug!(
                    "PoseTrigger: matched at {:.3}s legs={:.0}/{:.0} arms={:.0}/{:.0}",
                    timestamp.as_secs_f64(),
                    angles.left_leg,
                    angles.right_leg,
                    angles.left_arm,
                    angles.right_arm
                );
            }
            reactions.push(Reaction::PoseMatched);
        }
        self.matched = matched;
        Decision {
            reactions,
            present: matched,
            game_over: false,
        }
    }

    fn reset(&mut self) {
        self.matched = false;
    }
}
