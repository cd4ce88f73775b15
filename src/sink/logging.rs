use anyhow::Result;

use super::{Delivery, ReactionSink};
use crate::decide::Reaction;
use crate::payload::ReactionPayload;

/// Logs pose matches and game-over for runs without a client.
#[derive(Debug, Default)]
pub struct LogSink {
    matches: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self) -> u64 {
        self.matches
    }
}

impl ReactionSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery> {
        match reaction {
            Reaction::PoseMatched => {
                self.matches += 1;
                log::info!("LogSink: pose matched (#{})", self.matches);
                Ok(Delivery::Delivered)
            }
            Reaction::Payload(payload) if payload.is_game_over() => {
                log::info!("LogSink: game over");
                Ok(Delivery::Delivered)
            }
            Reaction::Payload(ReactionPayload::Boxes(boxes)) => {
                log::trace!("LogSink: {} boxes", boxes.len());
                Ok(Delivery::Skipped)
            }
            Reaction::Payload(_) => Ok(Delivery::Skipped),
        }
    }
}
