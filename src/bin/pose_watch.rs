//! pose_watch - local pose trigger
//!
//! Watches the camera with a pose detector and plays a sound each time the
//! target pose (one leg straight, one bent, one arm tucked, one raised) is
//! struck. Runs until Ctrl-C or the camera stream ends.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use pose_trigger::{DecisionMode, DetectorKind, SessionBuilder, StopSignal, TriggerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension). Defaults to POSE_TRIGGER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera index, device path, or stub://name.
    #[arg(long)]
    camera: Option<String>,
    /// Sound asset played on each match.
    #[arg(long)]
    sound: Option<PathBuf>,
    /// Audio player command line, e.g. "paplay".
    #[arg(long)]
    player: Option<String>,
    /// Detector backend: scripted or tract-pose.
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// ONNX pose model for the tract-pose detector.
    #[arg(long)]
    model: Option<PathBuf>,
    /// JSON-lines detection script for the scripted detector.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Stop after this many frames (synthetic cameras).
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(self, cfg: &mut TriggerConfig) {
        if let Some(camera) = self.camera {
            cfg.camera.device = camera;
        }
        if let Some(sound) = self.sound {
            cfg.audio.asset = Some(sound);
        }
        if let Some(player) = self.player {
            cfg.audio.player = Some(player);
        }
        if let Some(kind) = self.detector {
            cfg.detector.kind = kind;
        }
        if let Some(model) = self.model {
            cfg.detector.model_path = Some(model);
        }
        if let Some(script) = self.script {
            cfg.detector.script_path = Some(script);
        }
        if let Some(max_frames) = self.max_frames {
            cfg.camera.max_frames = Some(max_frames);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = Args::parse();
    let mut cfg = match args.config.take() {
        Some(path) => TriggerConfig::load_from(Some(&path))?,
        None => TriggerConfig::load()?,
    };
    args.apply(&mut cfg);
    cfg.decision.mode = DecisionMode::Pose;
    cfg.validate()?;
    if cfg.audio.asset.is_none() {
        log::warn!("pose_watch: no sound asset configured, matches are only logged");
    }

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).context("error setting Ctrl-C handler")?;

    let pipeline = SessionBuilder::new(cfg.clone())
        .log_reactions(true)
        .build_pipeline()?;
    log::info!(
        "pose_watch running. camera={} detector={}",
        cfg.camera.device,
        cfg.detector.kind.as_str()
    );

    let summary = pipeline.run(&stop);
    log::info!(
        "pose_watch stopped after {} frames: {}",
        summary.frames,
        summary.reason
    );
    if summary.reason.is_failure() {
        return Err(anyhow!("pose_watch failed: {}", summary.reason));
    }
    Ok(())
}
