//! Frame ingestion sources.
//!
//! This module provides the sources that feed the pipeline driver:
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//! - Synthetic `stub://` cameras with deterministic timestamps (testing, demos)
//!
//! All sources produce RGB24 `Frame`s stamped with the time since `connect`.
//! A source returns `Ok(None)` when the stream has ended; the driver treats
//! that as a clean stop rather than an error.

mod camera;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{device_path, CameraConfig, CameraSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A producer of frames for one session.
///
/// Sources are constructed per session, on the session's own thread, and are
/// exclusively owned by that session's pipeline driver.
pub trait FrameSource {
    /// Open the underlying device.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;

    /// Release the device. Called once when the session ends.
    fn close(&mut self) {}
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}
