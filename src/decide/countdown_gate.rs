use std::time::Duration;

use super::{Decision, DecisionStrategy, Reaction};
use crate::countdown::CountdownMachine;
use crate::detect::{DetectionCapability, DetectionResult};
use crate::payload::ReactionPayload;
use crate::zone::ZoneFilter;

/// Qualifying presence drives the countdown.
///
/// Emits two payloads per frame: the countdown state, then the boxes.
pub struct CountdownGate {
    filter: ZoneFilter,
    machine: CountdownMachine,
}

impl CountdownGate {
    pub fn new(filter: ZoneFilter, machine: CountdownMachine) -> Self {
        Self { filter, machine }
    }

    pub fn machine(&self) -> &CountdownMachine {
        &self.machine
    }
}

impl DecisionStrategy for CountdownGate {
    fn name(&self) -> &'static str {
        "countdown"
    }

    fn required_capability(&self) -> DetectionCapability {
        DetectionCapability::Objects
    }

    fn decide(&mut self, result: &DetectionResult, timestamp: Duration) -> Decision {
        let matches = self.filter.apply(&result.detections);
        let present = !matches.is_empty();
        let signal = self.machine.update(present, timestamp);
        if signal.game_over {
            log::info!(
                "CountdownGate: game over at {:.3}s",
                timestamp.as_secs_f64()
            );
        }
        let boxes = matches.iter().map(|m| m.to_box_message()).collect();
        Decision {
            reactions: vec![
                Reaction::Payload(ReactionPayload::Countdown(signal)),
                Reaction::Payload(ReactionPayload::Boxes(boxes)),
            ],
            present,
            game_over: signal.game_over,
        }
    }

    fn reset(&mut self) {
        self.machine.reset();
    }
}
