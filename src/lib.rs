//! Pose Trigger
//!
//! Camera-driven pose and person detection for games. Each frame runs
//! through one pipeline and comes out as a few game signals: "pose matched",
//! a countdown state, and person bounding boxes. These are played as a
//! sound or streamed as JSON over a WebSocket.
//!
//! # Architecture
//!
//! Data flows one way per frame:
//!
//! ```text
//! FrameSource -> Preprocess -> DetectorBackend -> DecisionStrategy -> ReactionSink*
//! ```
//!
//! - The pipeline driver owns the loop and its termination (`StopReason`).
//! - Detectors, sources and sinks are built per session; nothing is global.
//! - The only cross-frame state is inside the strategy (countdown, last
//!   pose-match edge) and is reset when a session ends.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (V4L2 cameras, synthetic `stub://` cameras)
//! - `frame`: Frame type and crop-zoom preprocessing
//! - `detect`: Detector backends (scripted, tract ONNX) and result types
//! - `pose`: Joint angles and the target-pose rule
//! - `zone`: Class/confidence filter and zone polygon
//! - `countdown`: Presence countdown state machine
//! - `decide`: Decision strategies (stream, countdown, pose)
//! - `payload`: JSON wire messages
//! - `sink`: Audio, WebSocket stream and log sinks
//! - `pipeline`: The per-session driver loop
//! - `server`: WebSocket accept loop and session threads
//! - `session`: Building sessions from `TriggerConfig`
//! - `config`: Layered file/env configuration

pub mod config;
pub mod countdown;
pub mod decide;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod payload;
pub mod pipeline;
pub mod pose;
pub mod server;
pub mod session;
pub mod sink;
pub mod zone;

pub use config::{DetectorKind, TriggerConfig};
pub use countdown::{CountdownMachine, CountdownPhase, CountdownSignal};
pub use decide::{
    CountdownGate, Decision, DecisionMode, DecisionStrategy, DetectionStream, PoseTrigger,
    Reaction,
};
pub use detect::{
    Detection, DetectionCapability, DetectionResult, DetectorBackend, Joint, Keypoint, PoseSample,
    ScriptedBackend,
};
pub use frame::{Frame, Preprocess};
pub use ingest::{CameraConfig, CameraSource, FrameSource, SourceStats};
pub use payload::{BoxMessage, ReactionPayload};
pub use pipeline::{
    Pipeline, PipelineConfig, SessionSummary, StepOutcome, StopReason, StopSignal,
};
pub use pose::{angle, is_target_pose, JointAngles, PoseRule};
pub use server::{ServerConfig, ServerHandle, SessionFactory, TriggerServer};
pub use session::SessionBuilder;
pub use sink::{
    AudioSink, AudioWorker, CommandPlayer, Delivery, LogSink, MessageTransport, ReactionSink,
    SoundPlayer, StreamSink, WsTransport,
};
pub use zone::{filter, Zone, ZoneFilter, ZoneMatch};
