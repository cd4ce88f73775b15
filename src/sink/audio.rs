use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{Delivery, ReactionSink};
use crate::decide::Reaction;

/// How long `AudioSink::close` waits for queued playback.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Plays one sound asset to completion.
pub trait SoundPlayer: Send {
    fn play(&mut self, asset: &Path) -> Result<()>;
}

/// Runs an external player program with the asset path as last argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line such as `paplay` or
    /// `ffplay -nodisp -autoexit`.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("audio player command is empty"))?;
        Ok(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("afplay", &[])
        } else {
            Self::new("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"])
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl SoundPlayer for CommandPlayer {
    fn play(&mut self, asset: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(asset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to run audio player '{}'", self.program))?;
        if !status.success() {
            bail!("audio player '{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Detached playback thread fed by a one-slot queue.
///
/// A request that arrives while another is still queued is dropped, so a
/// burst of triggers plays at most one extra sound.
pub struct AudioWorker {
    tx: Option<SyncSender<PathBuf>>,
    join: Option<JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(mut player: Box<dyn SoundPlayer>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<PathBuf>(1);
        let join = std::thread::Builder::new()
            .name("audio-worker".to_string())
            .spawn(move || {
                for asset in rx {
                    if let Err(err) = player.play(&asset) {
                        log::warn!("AudioWorker: playback of {} failed: {}", asset.display(), err);
                    }
                }
            })
            .context("failed to spawn audio worker")?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Queue a play request without blocking. Returns false when dropped.
    pub fn request(&self, asset: &Path) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(asset.to_path_buf()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("AudioWorker: busy, dropping play request");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("AudioWorker: worker thread is gone");
                false
            }
        }
    }

    /// Stop accepting requests and wait up to `wait` for queued playback.
    /// A player still running after that is left detached.
    pub fn shutdown(mut self, wait: Duration) -> Result<()> {
        self.tx.take();
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + wait;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("AudioWorker: playback still running after {:?}, detaching", wait);
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        join.join()
            .map_err(|_| anyhow!("audio worker thread panicked"))
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread exit on its own.
        self.tx.take();
    }
}

/// Plays the configured asset each time the target pose is struck.
pub struct AudioSink {
    asset: PathBuf,
    worker: Option<AudioWorker>,
    requested: u64,
}

impl AudioSink {
    pub fn new<P: AsRef<Path>>(asset: P, player: Box<dyn SoundPlayer>) -> Result<Self> {
        let asset = asset.as_ref().to_path_buf();
        if !asset.is_file() {
            bail!("sound asset {} does not exist", asset.display());
        }
        Ok(Self {
            asset,
            worker: Some(AudioWorker::spawn(player)?),
            requested: 0,
        })
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }
}

impl ReactionSink for AudioSink {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery> {
        if *reaction != Reaction::PoseMatched {
            return Ok(Delivery::Skipped);
        }
        let Some(worker) = &self.worker else {
            return Ok(Delivery::Skipped);
        };
        if worker.request(&self.asset) {
            self.requested += 1;
            Ok(Delivery::Delivered)
        } else {
            Ok(Delivery::Skipped)
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.shutdown(CLOSE_WAIT),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ReactionPayload;
    use std::sync::mpsc::{Receiver, Sender};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingPlayer {
        played: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl SoundPlayer for RecordingPlayer {
        fn play(&mut self, asset: &Path) -> Result<()> {
            self.played.lock().unwrap().push(asset.to_path_buf());
            Ok(())
        }
    }

    /// Reports when playback starts, then waits to be released.
    struct GatedPlayer {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl SoundPlayer for GatedPlayer {
        fn play(&mut self, _asset: &Path) -> Result<()> {
            self.started.send(()).ok();
            self.release.recv_timeout(Duration::from_secs(5)).ok();
            Ok(())
        }
    }

    #[test]
    fn parse_splits_program_and_args() -> Result<()> {
        let player = CommandPlayer::parse("ffplay -nodisp  -autoexit")?;
        assert_eq!(player, CommandPlayer::new("ffplay", &["-nodisp", "-autoexit"]));
        assert!(CommandPlayer::parse("   ").is_err());
        Ok(())
    }

    #[test]
    fn missing_player_program_is_an_error() {
        let mut player = CommandPlayer::new("pose-trigger-no-such-player", &[]);
        assert!(player.play(Path::new("/dev/null")).is_err());
    }

    #[test]
    fn sink_requires_existing_asset() {
        let result = AudioSink::new(
            "/nonexistent/pose-trigger/sound.wav",
            Box::new(RecordingPlayer::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn sink_plays_only_on_pose_matched() -> Result<()> {
        let asset = tempfile::NamedTempFile::new()?;
        let player = RecordingPlayer::default();
        let played = player.played.clone();
        let mut sink = AudioSink::new(asset.path(), Box::new(player))?;

        let boxes = Reaction::Payload(ReactionPayload::Boxes(Vec::new()));
        assert_eq!(sink.deliver(&boxes)?, Delivery::Skipped);
        assert_eq!(sink.deliver(&Reaction::PoseMatched)?, Delivery::Delivered);
        sink.close()?;

        assert_eq!(sink.requested(), 1);
        assert_eq!(*played.lock().unwrap(), vec![asset.path().to_path_buf()]);
        Ok(())
    }

    #[test]
    fn busy_worker_drops_extra_requests() -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let worker = AudioWorker::spawn(Box::new(GatedPlayer {
            started: started_tx,
            release: release_rx,
        }))?;
        let asset = Path::new("jump.wav");

        assert!(worker.request(asset));
        started_rx.recv_timeout(Duration::from_secs(5))?;
        // First sound is playing; one more fits in the queue.
        assert!(worker.request(asset));
        assert!(!worker.request(asset));

        release_tx.send(())?;
        started_rx.recv_timeout(Duration::from_secs(5))?;
        release_tx.send(())?;
        worker.shutdown(Duration::from_secs(5))?;
        Ok(())
    }

    #[test]
    fn close_does_not_wait_for_a_stuck_player() -> Result<()> {
        let asset = tempfile::NamedTempFile::new()?;
        let (started_tx, started_rx) = mpsc::channel();
        // Never released: the player stays busy for its full five seconds.
        let (_release_tx, release_rx) = mpsc::channel();
        let mut sink = AudioSink::new(
            asset.path(),
            Box::new(GatedPlayer {
                started: started_tx,
                release: release_rx,
            }),
        )?;

        assert_eq!(sink.deliver(&Reaction::PoseMatched)?, Delivery::Delivered);
        started_rx.recv_timeout(Duration::from_secs(5))?;

        let started = Instant::now();
        sink.close()?;
        let took = started.elapsed();
        assert!(took >= CLOSE_WAIT);
        assert!(took < Duration::from_secs(4), "close took {:?}", took);
        Ok(())
    }
}
