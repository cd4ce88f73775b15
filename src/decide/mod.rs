//! Decision strategies: turn one frame's detections into reactions.
//!
//! - `DetectionStream`: forward qualifying boxes every frame.
//! - `CountdownGate`: qualifying presence drives the countdown; emits the
//!   countdown state and then the boxes, and ends the round on game-over.
//! - `PoseTrigger`: fires once each time the target pose is struck.

mod countdown_gate;
mod pose_trigger;
mod stream;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{DetectionCapability, DetectionResult};
use crate::payload::ReactionPayload;

pub use countdown_gate::CountdownGate;
pub use pose_trigger::PoseTrigger;
pub use stream::DetectionStream;

/// Something a sink may act on.
#[derive(Clone, Debug, PartialEq)]
pub enum Reaction {
    /// Serialize to the connected client.
    Payload(ReactionPayload),
    /// The target pose was just struck.
    PoseMatched,
}

/// Output of one strategy step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decision {
    /// Delivered to sinks in order.
    pub reactions: Vec<Reaction>,
    /// Qualifying presence (or a matched pose) on this frame.
    pub present: bool,
    /// The round ended on this frame; the driver stops after delivery.
    pub game_over: bool,
}

pub trait DecisionStrategy: Send {
    fn name(&self) -> &'static str;

    /// What the detector must produce for this strategy.
    fn required_capability(&self) -> DetectionCapability;

    fn decide(&mut self, result: &DetectionResult, timestamp: Duration) -> Decision;

    /// Drop any cross-frame state.
    fn reset(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    Stream,
    Countdown,
    Pose,
}

impl DecisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMode::Stream => "stream",
            DecisionMode::Countdown => "countdown",
            DecisionMode::Pose => "pose",
        }
    }

    pub fn required_capability(&self) -> DetectionCapability {
        match self {
            DecisionMode::Pose => DetectionCapability::Pose,
            DecisionMode::Stream | DecisionMode::Countdown => DetectionCapability::Objects,
        }
    }
}

impl FromStr for DecisionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stream" => Ok(DecisionMode::Stream),
            "countdown" => Ok(DecisionMode::Countdown),
            "pose" => Ok(DecisionMode::Pose),
            other => Err(anyhow!(
                "unknown decision mode '{}' (expected stream, countdown or pose)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
