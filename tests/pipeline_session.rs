use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use pose_trigger::{
    CameraConfig, CameraSource, CountdownGate, CountdownMachine, Delivery, Detection,
    DetectionResult, Joint, Keypoint, Pipeline, PipelineConfig, PoseRule, PoseSample,
    PoseTrigger, Reaction, ReactionPayload, ReactionSink, ScriptedBackend, StopReason,
    StopSignal, ZoneFilter,
};

/// Records every reaction in delivery order.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Reaction>>>,
}

impl ReactionSink for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery> {
        self.seen.lock().unwrap().push(reaction.clone());
        Ok(Delivery::Delivered)
    }
}

fn camera_30fps(max_frames: Option<u64>) -> Box<CameraSource> {
    Box::new(
        CameraSource::new(CameraConfig {
            device: "stub://e2e".to_string(),
            width: 64,
            height: 36,
            target_fps: 30,
            max_frames,
        })
        .expect("synthetic camera"),
    )
}

fn unpaced() -> PipelineConfig {
    PipelineConfig {
        pacing: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn countdowns(seen: &[Reaction]) -> Vec<(u32, bool)> {
    seen.iter()
        .filter_map(|r| match r {
            Reaction::Payload(ReactionPayload::Countdown(s)) => Some((s.countdown, s.game_over)),
            _ => None,
        })
        .collect()
}

#[test]
fn person_from_first_frame_ends_game_at_three_seconds() {
    let person = DetectionResult::objects(vec![Detection::new(
        "person",
        0.92,
        [0.2, 0.1, 0.45, 0.95],
    )]);
    let recorder = Recorder::default();
    let pipeline = Pipeline::new(
        camera_30fps(None),
        Box::new(ScriptedBackend::constant(person)),
        Box::new(CountdownGate::new(
            ZoneFilter::new("person", 0.8),
            CountdownMachine::default(),
        )),
        unpaced(),
    )
    .expect("pipeline")
    .with_sink(Box::new(recorder.clone()));

    let summary = pipeline.run(&StopSignal::new());
    assert_eq!(summary.reason, StopReason::GameOver);
    assert!(summary.game_over_emitted);
    // Frame index 90 is t = 3.0 s; nothing is processed after it.
    assert_eq!(summary.frames, 91);

    let seen = recorder.seen.lock().unwrap();
    let states = countdowns(&seen);
    assert_eq!(states.len(), 91);
    assert_eq!(states.iter().filter(|(_, over)| *over).count(), 1);
    assert_eq!(states[0], (3, false));
    assert_eq!(states[29], (3, false));
    assert_eq!(states[30], (2, false));
    assert_eq!(states[60], (1, false));
    assert_eq!(states[89], (1, false));
    assert_eq!(states[90], (0, true));
    // The last payload is the boxes that follow game-over.
    assert!(matches!(
        seen.last(),
        Some(Reaction::Payload(ReactionPayload::Boxes(b))) if b.len() == 1
    ));
}

#[test]
fn single_absent_frame_restarts_the_countdown() {
    let present = DetectionResult::objects(vec![Detection::new("person", 0.9, [0.1, 0.1, 0.2, 0.2])]);
    let absent = DetectionResult::objects(vec![Detection::new("person", 0.3, [0.1, 0.1, 0.2, 0.2])]);
    // 60 frames present, one absent, then present until the end.
    let mut script = vec![present.clone(); 60];
    script.push(absent);
    script.extend(vec![present; 80]);

    let recorder = Recorder::default();
    let pipeline = Pipeline::new(
        camera_30fps(Some(141)),
        Box::new(ScriptedBackend::new(script)),
        Box::new(CountdownGate::new(
            ZoneFilter::new("person", 0.8),
            CountdownMachine::default(),
        )),
        unpaced(),
    )
    .expect("pipeline")
    .with_sink(Box::new(recorder.clone()));

    let summary = pipeline.run(&StopSignal::new());
    // Presence restarts at frame 61 (t = 2.033 s); 80 frames is < 3 s.
    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert!(!summary.game_over_emitted);

    let states = countdowns(&recorder.seen.lock().unwrap());
    assert_eq!(states[60], (0, false));
    assert_eq!(states[61], (3, false));
    assert!(states.iter().all(|(_, over)| !over));
}

fn target_pose() -> PoseSample {
    let mut sample = PoseSample::default();
    let mut put = |joint: Joint, x: f32, y: f32| sample.set(joint, Keypoint::new(x, y, 0.9));
    // Left leg straight, right leg folded, left elbow folded back past the
    // shoulder, right arm extended away from the hip.
    put(Joint::LeftHip, 0.4, 0.5);
    put(Joint::LeftKnee, 0.4, 0.7);
    put(Joint::LeftAnkle, 0.4, 0.9);
    put(Joint::RightHip, 0.6, 0.5);
    put(Joint::RightKnee, 0.6, 0.7);
    put(Joint::RightAnkle, 0.61, 0.52);
    put(Joint::LeftShoulder, 0.4, 0.2);
    put(Joint::LeftElbow, 0.42, 0.1);
    put(Joint::RightShoulder, 0.6, 0.2);
    put(Joint::RightElbow, 0.62, 0.35);
    sample
}

#[test]
fn pose_match_fires_once_per_strike() {
    let pose = DetectionResult::poses(vec![target_pose()]);
    let empty = DetectionResult::default();
    let script = vec![
        empty.clone(),
        pose.clone(),
        pose.clone(),
        pose.clone(),
        empty,
        pose,
    ];

    let recorder = Recorder::default();
    let pipeline = Pipeline::new(
        camera_30fps(Some(6)),
        Box::new(ScriptedBackend::new(script)),
        Box::new(PoseTrigger::new(PoseRule::default())),
        unpaced(),
    )
    .expect("pipeline")
    .with_sink(Box::new(recorder.clone()));

    let summary = pipeline.run(&StopSignal::new());
    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.frames, 6);
    let matches = recorder
        .seen
        .lock()
        .unwrap()
        .iter()
        .filter(|r| **r == Reaction::PoseMatched)
        .count();
    assert_eq!(matches, 2);
}
