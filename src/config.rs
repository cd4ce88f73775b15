//! Layered configuration: built-in defaults, an optional JSON or TOML file,
//! then `POSE_TRIGGER_*` environment overrides, then validation.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::countdown::DEFAULT_COUNTDOWN_SECS;
use crate::decide::DecisionMode;
use crate::detect::DetectionCapability;
use crate::frame::Preprocess;
use crate::ingest::CameraConfig;
use crate::pipeline::{PipelineConfig, DEFAULT_PACING};
use crate::pose::PoseRule;
use crate::server::ServerConfig;
use crate::zone::Zone;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_CLASS_LABEL: &str = "person";
const DEFAULT_OBJECT_INPUT: u32 = 640;
const DEFAULT_POSE_INPUT: u32 = 192;

#[derive(Debug, Deserialize, Default)]
struct TriggerConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    decision: Option<DecisionConfigFile>,
    countdown: Option<CountdownConfigFile>,
    pose: Option<PoseRule>,
    pipeline: Option<PipelineConfigFile>,
    audio: Option<AudioConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    path: Option<String>,
    max_sessions: Option<usize>,
    send_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DecisionConfigFile {
    mode: Option<DecisionMode>,
    class_label: Option<String>,
    min_confidence: Option<f32>,
    zone: Option<Vec<[f32; 2]>>,
}

#[derive(Debug, Deserialize, Default)]
struct CountdownConfigFile {
    seconds: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    pacing_ms: Option<u64>,
    zoom: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AudioConfigFile {
    asset: Option<PathBuf>,
    player: Option<String>,
}

/// Which detector backend a session builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Replays a JSON-lines script (or nothing).
    Scripted,
    /// YOLOv8 ONNX via tract.
    TractObjects,
    /// MoveNet single-pose ONNX via tract.
    TractPose,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Scripted => "scripted",
            DetectorKind::TractObjects => "tract-objects",
            DetectorKind::TractPose => "tract-pose",
        }
    }

    fn provides(&self, capability: DetectionCapability) -> bool {
        match self {
            DetectorKind::Scripted => true,
            DetectorKind::TractObjects => capability == DetectionCapability::Objects,
            DetectorKind::TractPose => capability == DetectionCapability::Pose,
        }
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "scripted" => Ok(DetectorKind::Scripted),
            "tract-objects" => Ok(DetectorKind::TractObjects),
            "tract-pose" => Ok(DetectorKind::TractPose),
            other => Err(anyhow!(
                "unknown detector kind '{}' (expected scripted, tract-objects or tract-pose)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    /// Square model input edge; defaults by kind when unset.
    pub input_size: Option<u32>,
}

impl DetectorSettings {
    pub fn input_size(&self) -> u32 {
        self.input_size.unwrap_or(match self.kind {
            DetectorKind::TractPose => DEFAULT_POSE_INPUT,
            _ => DEFAULT_OBJECT_INPUT,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionSettings {
    pub mode: DecisionMode,
    pub class_label: String,
    /// Unset means the mode default: 0.8 for countdown, no floor for stream.
    pub min_confidence: Option<f32>,
    pub zone: Option<Zone>,
}

impl DecisionSettings {
    pub fn min_confidence(&self) -> f32 {
        self.min_confidence.unwrap_or(match self.mode {
            DecisionMode::Stream => 0.0,
            DecisionMode::Countdown | DecisionMode::Pose => DEFAULT_MIN_CONFIDENCE,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub asset: Option<PathBuf>,
    /// Player command line; the platform default when unset.
    pub player: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub detector: DetectorSettings,
    pub decision: DecisionSettings,
    pub countdown_secs: u32,
    pub pose_rule: PoseRule,
    pub pipeline: PipelineConfig,
    pub audio: AudioSettings,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
            detector: DetectorSettings {
                kind: DetectorKind::Scripted,
                model_path: None,
                script_path: None,
                input_size: None,
            },
            decision: DecisionSettings {
                mode: DecisionMode::Countdown,
                class_label: DEFAULT_CLASS_LABEL.to_string(),
                min_confidence: None,
                zone: None,
            },
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            pose_rule: PoseRule::default(),
            pipeline: PipelineConfig::default(),
            audio: AudioSettings {
                asset: None,
                player: None,
            },
        }
    }
}

impl TriggerConfig {
    /// Load using the file named by `POSE_TRIGGER_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POSE_TRIGGER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or none), then apply the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TriggerConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let server_file = file.server.unwrap_or_default();
        let server = ServerConfig {
            addr: server_file.addr.unwrap_or(defaults.server.addr),
            path: server_file.path.unwrap_or(defaults.server.path),
            max_sessions: server_file
                .max_sessions
                .unwrap_or(defaults.server.max_sessions),
            send_timeout: server_file
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.server.send_timeout),
        };

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file.device.unwrap_or(defaults.camera.device),
            width: camera_file.width.unwrap_or(defaults.camera.width),
            height: camera_file.height.unwrap_or(defaults.camera.height),
            target_fps: camera_file.target_fps.unwrap_or(defaults.camera.target_fps),
            max_frames: camera_file.max_frames,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            kind: detector_file.kind.unwrap_or(defaults.detector.kind),
            model_path: detector_file.model_path,
            script_path: detector_file.script_path,
            input_size: detector_file.input_size,
        };

        let decision_file = file.decision.unwrap_or_default();
        let zone = match decision_file.zone {
            Some(vertices) if !vertices.is_empty() => {
                Some(Zone::new(vertices).context("invalid decision.zone")?)
            }
            _ => None,
        };
        let decision = DecisionSettings {
            mode: decision_file.mode.unwrap_or(defaults.decision.mode),
            class_label: decision_file
                .class_label
                .unwrap_or(defaults.decision.class_label),
            min_confidence: decision_file.min_confidence,
            zone,
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineConfig {
            pacing: pipeline_file
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PACING),
            preprocess: match pipeline_file.zoom {
                Some(zoom) => Preprocess::from_zoom(zoom).context("invalid pipeline.zoom")?,
                None => Preprocess::Identity,
            },
        };

        let audio_file = file.audio.unwrap_or_default();

        Ok(Self {
            server,
            camera,
            detector,
            decision,
            countdown_secs: file
                .countdown
                .and_then(|countdown| countdown.seconds)
                .unwrap_or(defaults.countdown_secs),
            pose_rule: file.pose.unwrap_or_default(),
            pipeline,
            audio: AudioSettings {
                asset: audio_file.asset,
                player: audio_file.player,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("POSE_TRIGGER_ADDR") {
            self.server.addr = addr;
        }
        if let Some(device) = env_value("POSE_TRIGGER_CAMERA") {
            self.camera.device = device;
        }
        if let Some(mode) = env_value("POSE_TRIGGER_MODE") {
            self.decision.mode = mode
                .parse()
                .context("POSE_TRIGGER_MODE is not a decision mode")?;
        }
        if let Some(kind) = env_value("POSE_TRIGGER_DETECTOR") {
            self.detector.kind = kind
                .parse()
                .context("POSE_TRIGGER_DETECTOR is not a detector kind")?;
        }
        if let Some(path) = env_value("POSE_TRIGGER_MODEL") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_value("POSE_TRIGGER_MIN_CONFIDENCE") {
            let confidence: f32 = value
                .parse()
                .map_err(|_| anyhow!("POSE_TRIGGER_MIN_CONFIDENCE must be a number"))?;
            self.decision.min_confidence = Some(confidence);
        }
        if let Some(path) = env_value("POSE_TRIGGER_SOUND") {
            self.audio.asset = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Check cross-field constraints. Binaries call this again after
    /// applying command-line overrides.
    pub fn validate(&self) -> Result<()> {
        self.server
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server address '{}'", self.server.addr))?;
        if !self.server.path.starts_with('/') {
            bail!("server path must start with '/'");
        }
        if self.server.max_sessions == 0 {
            bail!("server max_sessions must be >= 1");
        }
        if self.server.send_timeout.is_zero() {
            bail!("server send_timeout_ms must be greater than zero");
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            bail!("camera resolution must be non-zero");
        }
        if self.camera.target_fps == 0 {
            bail!("camera target_fps must be >= 1");
        }

        let confidence = self.decision.min_confidence();
        if !(0.0..=1.0).contains(&confidence) {
            bail!("min_confidence must be within [0, 1], got {}", confidence);
        }
        if self.decision.class_label.trim().is_empty() {
            bail!("decision class_label must not be empty");
        }
        if self.countdown_secs == 0 {
            bail!("countdown seconds must be >= 1");
        }
        for (name, value) in [
            ("straight_leg_min", self.pose_rule.straight_leg_min),
            ("bent_leg_max", self.pose_rule.bent_leg_max),
            ("tucked_arm_max", self.pose_rule.tucked_arm_max),
            ("raised_arm_min", self.pose_rule.raised_arm_min),
        ] {
            if !(0.0..=180.0).contains(&value) {
                bail!("pose threshold {} must be within [0, 180], got {}", name, value);
            }
        }

        let capability = self.decision.mode.required_capability();
        if !self.detector.kind.provides(capability) {
            bail!(
                "detector '{}' cannot drive decision mode '{}'",
                self.detector.kind.as_str(),
                self.decision.mode
            );
        }
        if self.detector.kind != DetectorKind::Scripted && self.detector.model_path.is_none() {
            bail!(
                "detector '{}' requires detector.model_path",
                self.detector.kind.as_str()
            );
        }
        if self.detector.input_size() == 0 {
            bail!("detector input_size must be >= 1");
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<TriggerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
