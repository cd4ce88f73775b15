//! Per-session construction from configuration.
//!
//! Nothing here is shared between sessions: each call builds a new camera
//! source, detector, strategy and local sinks.

use anyhow::{bail, Result};

use crate::config::{DetectorKind, TriggerConfig};
use crate::countdown::CountdownMachine;
use crate::decide::{CountdownGate, DecisionMode, DecisionStrategy, DetectionStream, PoseTrigger};
use crate::detect::{DetectorBackend, ScriptedBackend};
use crate::ingest::{CameraSource, FrameSource};
use crate::pipeline::Pipeline;
use crate::server::SessionFactory;
use crate::sink::{AudioSink, CommandPlayer, LogSink};
use crate::zone::ZoneFilter;

#[derive(Clone, Debug)]
pub struct SessionBuilder {
    config: TriggerConfig,
    log_reactions: bool,
}

impl SessionBuilder {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            log_reactions: false,
        }
    }

    /// Attach a `LogSink` to every session.
    pub fn log_reactions(mut self, enabled: bool) -> Self {
        self.log_reactions = enabled;
        self
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn build_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CameraSource::new(self.config.camera.clone())?))
    }

    pub fn build_backend(&self) -> Result<Box<dyn DetectorBackend>> {
        let detector = &self.config.detector;
        match detector.kind {
            DetectorKind::Scripted => {
                let backend = match &detector.script_path {
                    Some(path) => ScriptedBackend::from_jsonl(path)?.cycle(true),
                    None => ScriptedBackend::default(),
                };
                Ok(Box::new(backend))
            }
            #[cfg(feature = "backend-tract")]
            DetectorKind::TractObjects => {
                let Some(path) = &detector.model_path else {
                    bail!("detector.model_path is required for tract-objects");
                };
                Ok(Box::new(crate::detect::TractObjectBackend::new(
                    path,
                    detector.input_size(),
                )?))
            }
            #[cfg(feature = "backend-tract")]
            DetectorKind::TractPose => {
                let Some(path) = &detector.model_path else {
                    bail!("detector.model_path is required for tract-pose");
                };
                Ok(Box::new(crate::detect::TractPoseBackend::new(
                    path,
                    detector.input_size(),
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            kind => bail!(
                "detector '{}' requires the backend-tract feature",
                kind.as_str()
            ),
        }
    }

    pub fn build_strategy(&self) -> Box<dyn DecisionStrategy> {
        let decision = &self.config.decision;
        let filter = ZoneFilter::new(&decision.class_label, decision.min_confidence())
            .with_zone(decision.zone.clone());
        match decision.mode {
            DecisionMode::Stream => Box::new(DetectionStream::new(filter)),
            DecisionMode::Countdown => Box::new(CountdownGate::new(
                filter,
                CountdownMachine::new(self.config.countdown_secs),
            )),
            DecisionMode::Pose => Box::new(PoseTrigger::new(self.config.pose_rule)),
        }
    }

    /// A complete pipeline with local sinks (audio, log) attached.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(
            self.build_source()?,
            self.build_backend()?,
            self.build_strategy(),
            self.config.pipeline,
        )?;
        if let Some(asset) = &self.config.audio.asset {
            let player = match &self.config.audio.player {
                Some(command) => CommandPlayer::parse(command)?,
                None => CommandPlayer::platform_default(),
            };
            log::info!(
                "SessionBuilder: audio {} via {}",
                asset.display(),
                player.program()
            );
            pipeline.add_sink(Box::new(AudioSink::new(asset, Box::new(player))?));
        }
        if self.log_reactions {
            pipeline.add_sink(Box::new(LogSink::new()));
        }
        Ok(pipeline)
    }
}

impl SessionFactory for SessionBuilder {
    fn build(&self) -> Result<Pipeline> {
        self.build_pipeline()
    }
}
