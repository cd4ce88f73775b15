//! Outbound messages for the game front end.
//!
//! Each payload is one UTF-8 JSON text frame:
//! - `{"countdown": 3}` or `{"countdown": 0, "game_over": true}`
//! - `[{"label": "person", "confidence": 0.91, "bbox": [x0, y0, x1, y1]}, ...]`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::countdown::CountdownSignal;

/// One detection box, normalized to the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxMessage {
    pub label: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
    /// Present only when a zone is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_zone: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReactionPayload {
    Countdown(CountdownSignal),
    Boxes(Vec<BoxMessage>),
}

impl ReactionPayload {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize reaction payload")
    }

    pub fn is_game_over(&self) -> bool {
        matches!(self, ReactionPayload::Countdown(signal) if signal.game_over)
    }
}
