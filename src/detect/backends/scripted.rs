use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::DetectionResult;

/// Replays a fixed sequence of detection results, one per frame.
///
/// Used for tests and for driving a front end without a model. Scripts can be
/// loaded from JSON lines, one `DetectionResult` object per line.
pub struct ScriptedBackend {
    script: VecDeque<DetectionResult>,
    cycle: bool,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(results: Vec<DetectionResult>) -> Self {
        Self {
            script: results.into(),
            cycle: false,
            calls: 0,
        }
    }

    /// Same result for every frame.
    pub fn constant(result: DetectionResult) -> Self {
        Self::new(vec![result]).cycle(true)
    }

    /// Restart from the beginning once the script runs out. Without cycling,
    /// an exhausted script yields empty results.
    pub fn cycle(mut self, enabled: bool) -> Self {
        self.cycle = enabled;
        self
    }

    pub fn from_jsonl<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let mut results = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let result: DetectionResult = serde_json::from_str(line).with_context(|| {
                format!("invalid detection script {}:{}", path.display(), lineno + 1)
            })?;
            results.push(result);
        }
        log::info!(
            "ScriptedBackend: loaded {} results from {}",
            results.len(),
            path.display()
        );
        Ok(Self::new(results))
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::Pose | DetectionCapability::Objects
        )
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<DetectionResult> {
        self.calls += 1;
        let Some(next) = self.script.pop_front() else {
            return Ok(DetectionResult::default());
        };
        if self.cycle {
            self.script.push_back(next.clone());
        }
        Ok(next)
    }
}
