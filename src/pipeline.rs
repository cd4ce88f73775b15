//! Pipeline driver.
//!
//! One loop per session: capture, preprocess, detect, decide, react, pace.
//! Every way out of the loop is an explicit `StopReason`; sinks and the
//! source are closed on all of them.

use anyhow::{bail, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::decide::DecisionStrategy;
use crate::detect::DetectorBackend;
use crate::frame::Preprocess;
use crate::ingest::FrameSource;
use crate::sink::{Delivery, ReactionSink};

pub const DEFAULT_PACING: Duration = Duration::from_millis(33);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Shared cooperative stop flag, polled once per iteration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    GameOver,
    StopRequested,
    ClientDisconnected,
    DetectorFailed(String),
    TransportFailed(String),
    CaptureFailed(String),
}

impl StopReason {
    /// True for the reasons that end a session because something broke.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::DetectorFailed(_)
                | StopReason::TransportFailed(_)
                | StopReason::CaptureFailed(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfStream => f.write_str("end of stream"),
            StopReason::GameOver => f.write_str("game over"),
            StopReason::StopRequested => f.write_str("stop requested"),
            StopReason::ClientDisconnected => f.write_str("client disconnected"),
            StopReason::DetectorFailed(msg) => write!(f, "detector failed: {}", msg),
            StopReason::TransportFailed(msg) => write!(f, "transport failed: {}", msg),
            StopReason::CaptureFailed(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Stop(StopReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Frames taken from the source.
    pub frames: u64,
    pub reason: StopReason,
    pub game_over_emitted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Fixed sleep after each processed frame.
    pub pacing: Duration,
    pub preprocess: Preprocess,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            preprocess: Preprocess::Identity,
        }
    }
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    backend: Box<dyn DetectorBackend>,
    strategy: Box<dyn DecisionStrategy>,
    sinks: Vec<Box<dyn ReactionSink>>,
    config: PipelineConfig,
    frames: u64,
    game_over_emitted: bool,
    last_detections: usize,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        backend: Box<dyn DetectorBackend>,
        strategy: Box<dyn DecisionStrategy>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let capability = strategy.required_capability();
        if !backend.supports(capability) {
            bail!(
                "detector '{}' does not provide {:?} output required by strategy '{}'",
                backend.name(),
                capability,
                strategy.name()
            );
        }
        Ok(Self {
            source,
            backend,
            strategy,
            sinks: Vec::new(),
            config,
            frames: 0,
            game_over_emitted: false,
            last_detections: 0,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn ReactionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn ReactionSink>) {
        self.sinks.push(sink);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Drive the loop until a stop condition, then release everything.
    pub fn run(mut self, stop: &StopSignal) -> SessionSummary {
        log::info!(
            "Pipeline: starting strategy={} detector={} sinks=[{}]",
            self.strategy.name(),
            self.backend.name(),
            self.sinks
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(",")
        );
        let reason = self.drive(stop);
        self.shutdown();

        if reason.is_failure() {
            log::warn!("Pipeline: stopped after {} frames: {}", self.frames, reason);
        } else {
            log::info!("Pipeline: stopped after {} frames: {}", self.frames, reason);
        }
        SessionSummary {
            frames: self.frames,
            reason,
            game_over_emitted: self.game_over_emitted,
        }
    }

    fn drive(&mut self, stop: &StopSignal) -> StopReason {
        if let Err(err) = self.source.connect() {
            return StopReason::CaptureFailed(format!("{:#}", err));
        }
        if let Err(err) = self.backend.warm_up() {
            return StopReason::DetectorFailed(format!("{:#}", err));
        }

        let mut last_health_log = Instant::now();
        loop {
            if stop.is_stopped() {
                return StopReason::StopRequested;
            }
            if let StepOutcome::Stop(reason) = self.step() {
                return reason;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                log::info!(
                    "Pipeline: health={} frames={} device={} last_detections={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.device,
                    self.last_detections
                );
                last_health_log = Instant::now();
            }

            if !self.config.pacing.is_zero() {
                std::thread::sleep(self.config.pacing);
            }
        }
    }

    /// Process exactly one frame.
    pub fn step(&mut self) -> StepOutcome {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return StepOutcome::Stop(StopReason::EndOfStream),
            Err(err) => return StepOutcome::Stop(StopReason::CaptureFailed(format!("{:#}", err))),
        };
        self.frames += 1;
        let timestamp = frame.timestamp;

        let frame = match self.config.preprocess.apply(frame) {
            Ok(frame) => frame,
            Err(err) => return StepOutcome::Stop(StopReason::CaptureFailed(format!("{:#}", err))),
        };
        let result = match frame.run_detector(self.backend.as_mut()) {
            Ok(result) => result,
            Err(err) => {
                return StepOutcome::Stop(StopReason::DetectorFailed(format!("{:#}", err)))
            }
        };
        drop(frame);
        self.last_detections = result.detections.len() + result.poses.len();

        let decision = self.strategy.decide(&result, timestamp);
        for reaction in &decision.reactions {
            for sink in self.sinks.iter_mut() {
                match sink.deliver(reaction) {
                    Ok(Delivery::Delivered) | Ok(Delivery::Skipped) => {}
                    Ok(Delivery::Disconnected) => {
                        return StepOutcome::Stop(StopReason::ClientDisconnected)
                    }
                    Err(err) => {
                        return StepOutcome::Stop(StopReason::TransportFailed(format!(
                            "{}: {:#}",
                            sink.name(),
                            err
                        )))
                    }
                }
            }
        }

        if decision.game_over {
            self.game_over_emitted = true;
            return StepOutcome::Stop(StopReason::GameOver);
        }
        StepOutcome::Continue
    }

    fn shutdown(&mut self) {
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.close() {
                log::warn!("Pipeline: closing sink {} failed: {:#}", sink.name(), err);
            }
        }
        self.strategy.reset();
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::CountdownMachine;
    use crate::decide::{CountdownGate, DetectionStream, PoseTrigger, Reaction};
    use crate::detect::{Detection, DetectionResult, ScriptedBackend};
    use crate::ingest::{CameraConfig, CameraSource};
    use crate::pose::PoseRule;
    use crate::zone::ZoneFilter;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        seen: Arc<Mutex<Vec<Reaction>>>,
        closed: Arc<AtomicBool>,
        disconnect_after: Option<usize>,
        fail_after: Option<usize>,
    }

    impl ReactionSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery> {
            let mut seen = self.seen.lock().unwrap();
            if self.disconnect_after.is_some_and(|n| seen.len() >= n) {
                return Ok(Delivery::Disconnected);
            }
            if self.fail_after.is_some_and(|n| seen.len() >= n) {
                bail!("socket write timed out");
            }
            seen.push(reaction.clone());
            Ok(Delivery::Delivered)
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn supports(&self, _capability: crate::detect::DetectionCapability) -> bool {
            true
        }

        fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<DetectionResult> {
            bail!("model exploded")
        }
    }

    /// Camera that can fail to open or fail after a number of frames.
    struct BrokenCamera {
        inner: CameraSource,
        fail_connect: bool,
        fail_after: u64,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for BrokenCamera {
        fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                bail!("device busy");
            }
            self.inner.connect()
        }

        fn next_frame(&mut self) -> Result<Option<crate::frame::Frame>> {
            if self.inner.stats().frames_captured >= self.fail_after {
                bail!("capture ioctl failed");
            }
            self.inner.next_frame()
        }

        fn is_healthy(&self) -> bool {
            self.inner.is_healthy()
        }

        fn stats(&self) -> crate::ingest::SourceStats {
            self.inner.stats()
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn broken_camera(fail_connect: bool, fail_after: u64) -> (Box<dyn FrameSource>, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let inner = CameraSource::new(CameraConfig {
            device: "stub://broken".to_string(),
            width: 32,
            height: 18,
            target_fps: 30,
            max_frames: None,
        })
        .unwrap();
        let source = BrokenCamera {
            inner,
            fail_connect,
            fail_after,
            closed: closed.clone(),
        };
        (Box::new(source), closed)
    }

    fn camera(max_frames: Option<u64>) -> Box<dyn FrameSource> {
        Box::new(
            CameraSource::new(CameraConfig {
                device: "stub://test".to_string(),
                width: 32,
                height: 18,
                target_fps: 30,
                max_frames,
            })
            .unwrap(),
        )
    }

    fn unpaced() -> PipelineConfig {
        PipelineConfig {
            pacing: Duration::ZERO,
            ..PipelineConfig::default()
        }
    }

    fn person() -> DetectionResult {
        DetectionResult::objects(vec![Detection::new("person", 0.95, [0.1, 0.1, 0.4, 0.9])])
    }

    #[test]
    fn capability_mismatch_is_rejected() {
        let backend = ScriptedBackend::default();
        let pose = Box::new(PoseTrigger::new(PoseRule::default()));
        // Scripted backends support everything, so use a pose-only stand-in.
        struct ObjectsOnly(ScriptedBackend);
        impl DetectorBackend for ObjectsOnly {
            fn name(&self) -> &'static str {
                "objects-only"
            }
            fn supports(&self, capability: crate::detect::DetectionCapability) -> bool {
                capability == crate::detect::DetectionCapability::Objects
            }
            fn detect(&mut self, p: &[u8], w: u32, h: u32) -> Result<DetectionResult> {
                self.0.detect(p, w, h)
            }
        }
        let result = Pipeline::new(camera(None), Box::new(ObjectsOnly(backend)), pose, unpaced());
        assert!(result.is_err());
    }

    #[test]
    fn end_of_stream_stops_cleanly_and_closes_sinks() {
        let sink = RecordingSink::default();
        let closed = sink.closed.clone();
        let pipeline = Pipeline::new(
            camera(Some(5)),
            Box::new(ScriptedBackend::default()),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink.clone()));

        let summary = pipeline.run(&StopSignal::new());
        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert_eq!(summary.frames, 5);
        assert!(!summary.game_over_emitted);
        assert_eq!(sink.seen.lock().unwrap().len(), 5);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn game_over_stops_the_loop_once() {
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new(
            camera(None),
            Box::new(ScriptedBackend::constant(person())),
            Box::new(CountdownGate::new(
                ZoneFilter::new("person", 0.8),
                CountdownMachine::default(),
            )),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink.clone()));

        let summary = pipeline.run(&StopSignal::new());
        assert_eq!(summary.reason, StopReason::GameOver);
        assert!(summary.game_over_emitted);
        assert_eq!(summary.frames, 91);

        let seen = sink.seen.lock().unwrap();
        let game_overs = seen
            .iter()
            .filter(|r| matches!(r, Reaction::Payload(p) if p.is_game_over()))
            .count();
        assert_eq!(game_overs, 1);
        // Two payloads per frame: countdown state, then boxes.
        assert_eq!(seen.len(), 182);
    }

    #[test]
    fn detector_failure_ends_session() {
        let sink = RecordingSink::default();
        let closed = sink.closed.clone();
        let pipeline = Pipeline::new(
            camera(None),
            Box::new(FailingBackend),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink));

        let summary = pipeline.run(&StopSignal::new());
        assert!(matches!(summary.reason, StopReason::DetectorFailed(ref m) if m.contains("model exploded")));
        assert!(summary.reason.is_failure());
        assert_eq!(summary.frames, 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn client_disconnect_ends_session() {
        let sink = RecordingSink {
            disconnect_after: Some(3),
            ..RecordingSink::default()
        };
        let pipeline = Pipeline::new(
            camera(None),
            Box::new(ScriptedBackend::constant(person())),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink));

        let summary = pipeline.run(&StopSignal::new());
        assert_eq!(summary.reason, StopReason::ClientDisconnected);
        assert_eq!(summary.frames, 4);
    }

    #[test]
    fn transport_failure_ends_session_and_closes_every_sink() {
        let failing = RecordingSink {
            fail_after: Some(2),
            ..RecordingSink::default()
        };
        let failing_closed = failing.closed.clone();
        let other = RecordingSink::default();
        let other_closed = other.closed.clone();
        let pipeline = Pipeline::new(
            camera(None),
            Box::new(ScriptedBackend::constant(person())),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(failing))
        .with_sink(Box::new(other.clone()));

        let summary = pipeline.run(&StopSignal::new());
        assert!(matches!(
            summary.reason,
            StopReason::TransportFailed(ref m) if m.contains("socket write timed out")
        ));
        assert!(summary.reason.is_failure());
        assert_eq!(summary.frames, 3);
        // The failing sink stops delivery to later sinks for that reaction.
        assert_eq!(other.seen.lock().unwrap().len(), 2);
        assert!(failing_closed.load(Ordering::SeqCst));
        assert!(other_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn capture_error_mid_stream_ends_session() {
        let (source, source_closed) = broken_camera(false, 3);
        let sink = RecordingSink::default();
        let sink_closed = sink.closed.clone();
        let pipeline = Pipeline::new(
            source,
            Box::new(ScriptedBackend::default()),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink));

        let summary = pipeline.run(&StopSignal::new());
        assert!(matches!(
            summary.reason,
            StopReason::CaptureFailed(ref m) if m.contains("capture ioctl failed")
        ));
        assert!(summary.reason.is_failure());
        assert_eq!(summary.frames, 3);
        assert!(sink_closed.load(Ordering::SeqCst));
        assert!(source_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn camera_that_cannot_open_ends_session_before_any_frame() {
        let (source, source_closed) = broken_camera(true, u64::MAX);
        let sink = RecordingSink::default();
        let sink_closed = sink.closed.clone();
        let pipeline = Pipeline::new(
            source,
            Box::new(ScriptedBackend::default()),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap()
        .with_sink(Box::new(sink.clone()));

        let summary = pipeline.run(&StopSignal::new());
        assert!(matches!(
            summary.reason,
            StopReason::CaptureFailed(ref m) if m.contains("device busy")
        ));
        assert_eq!(summary.frames, 0);
        assert!(sink.seen.lock().unwrap().is_empty());
        assert!(sink_closed.load(Ordering::SeqCst));
        assert!(source_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_signal_is_checked_before_each_frame() {
        let stop = StopSignal::new();
        stop.stop();
        let pipeline = Pipeline::new(
            camera(None),
            Box::new(ScriptedBackend::default()),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            unpaced(),
        )
        .unwrap();
        let summary = pipeline.run(&stop);
        assert_eq!(summary.reason, StopReason::StopRequested);
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn crop_zoom_preprocess_runs_in_loop() {
        let pipeline = Pipeline::new(
            camera(Some(2)),
            Box::new(ScriptedBackend::default()),
            Box::new(DetectionStream::new(ZoneFilter::new("person", 0.0))),
            PipelineConfig {
                pacing: Duration::ZERO,
                preprocess: Preprocess::from_zoom(1.5).unwrap(),
            },
        )
        .unwrap();
        let summary = pipeline.run(&StopSignal::new());
        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert_eq!(summary.frames, 2);
    }
}
