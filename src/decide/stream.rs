use std::time::Duration;

use super::{Decision, DecisionStrategy, Reaction};
use crate::detect::{DetectionCapability, DetectionResult};
use crate::payload::ReactionPayload;
use crate::zone::ZoneFilter;

/// Forwards the filtered boxes of every frame; never ends the round.
pub struct DetectionStream {
    filter: ZoneFilter,
}

impl DetectionStream {
    pub fn new(filter: ZoneFilter) -> Self {
        Self { filter }
    }
}

impl DecisionStrategy for DetectionStream {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn required_capability(&self) -> DetectionCapability {
        DetectionCapability::Objects
    }

    fn decide(&mut self, result: &DetectionResult, _timestamp: Duration) -> Decision {
        let matches = self.filter.apply(&result.detections);
        let boxes = matches.iter().map(|m| m.to_box_message()).collect();
        Decision {
            present: !matches.is_empty(),
            reactions: vec![Reaction::Payload(ReactionPayload::Boxes(boxes))],
            game_over: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    #[test]
    fn emits_one_box_payload_per_frame() {
        let mut strategy = DetectionStream::new(ZoneFilter::new("person", 0.0));
        let result = DetectionResult::objects(vec![
            Detection::new("person", 0.3, [0.1, 0.1, 0.2, 0.2]),
            Detection::new("cat", 0.9, [0.5, 0.5, 0.6, 0.6]),
        ]);

        let decision = strategy.decide(&result, Duration::ZERO);
        assert!(decision.present);
        assert!(!decision.game_over);
        assert_eq!(decision.reactions.len(), 1);
        match &decision.reactions[0] {
            Reaction::Payload(ReactionPayload::Boxes(boxes)) => {
                assert_eq!(boxes.len(), 1);
                assert_eq!(boxes[0].label, "person");
            }
            other => panic!("unexpected reaction {other:?}"),
        }
    }

    #[test]
    fn empty_frame_still_emits_empty_array() {
        let mut strategy = DetectionStream::new(ZoneFilter::new("person", 0.0));
        let decision = strategy.decide(&DetectionResult::default(), Duration::ZERO);
        assert!(!decision.present);
        assert_eq!(
            decision.reactions,
            vec![Reaction::Payload(ReactionPayload::Boxes(Vec::new()))]
        );
    }
}
