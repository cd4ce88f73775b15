//! trigger_server - WebSocket game server
//!
//! This daemon:
//! 1. Listens for game clients on the configured WebSocket path (`/ws`)
//! 2. Builds a fresh camera/detector/strategy pipeline per client
//! 3. Streams countdown state and person boxes as JSON text frames
//! 4. Ends a session on game over, disconnect, or failure

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use pose_trigger::{
    DecisionMode, DetectorKind, SessionBuilder, StopSignal, TriggerConfig, TriggerServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension). Defaults to POSE_TRIGGER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:8000.
    #[arg(long)]
    addr: Option<String>,
    /// Camera index, device path, or stub://name.
    #[arg(long)]
    camera: Option<String>,
    /// Decision mode: stream or countdown.
    #[arg(long)]
    mode: Option<DecisionMode>,
    /// Detector backend: scripted, tract-objects, or tract-pose.
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// ONNX model for tract detectors.
    #[arg(long)]
    model: Option<PathBuf>,
    /// JSON-lines detection script for the scripted detector.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Minimum detection confidence.
    #[arg(long)]
    min_confidence: Option<f32>,
    /// Maximum concurrent client sessions.
    #[arg(long)]
    max_sessions: Option<usize>,
}

impl Args {
    fn apply(self, cfg: &mut TriggerConfig) {
        if let Some(addr) = self.addr {
            cfg.server.addr = addr;
        }
        if let Some(camera) = self.camera {
            cfg.camera.device = camera;
        }
        if let Some(mode) = self.mode {
            cfg.decision.mode = mode;
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
        if let Some(confidence) = self.min_confidence {
            cfg.decision.min_confidence = Some(confidence);
        }
        if let Some(max_sessions) = self.max_sessions {
            cfg.server.max_sessions = max_sessions;
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
    cfg.validate()?;
    if cfg.decision.mode == DecisionMode::Pose {
        bail!("trigger_server streams boxes and countdowns; use pose_watch for pose mode");
    }

    let stop = StopSignal::new();
    let handle = TriggerServer::new(cfg.server.clone(), SessionBuilder::new(cfg.clone()))
        .with_stop_signal(stop)
        .spawn()?;
    log::info!(
        "trigger_server listening on ws://{}{} mode={} detector={} camera={}",
        handle.addr,
        cfg.server.path,
        cfg.decision.mode,
        cfg.detector.kind.as_str(),
        cfg.camera.device
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("trigger_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping sessions...");
    handle.stop()?;

    Ok(())
}
