//! V4L2 frame source.
//!
//! `V4l2Source` captures from a local device node (`/dev/videoN`) through
//! memory-mapped buffers, converts each buffer to RGB24, and stamps it with
//! the time since `connect`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::camera::{device_path, CameraConfig};
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::SourceStats;
use crate::frame::Frame;

/// V4L2 frame source.
pub struct V4l2Source {
    config: CameraConfig,
    device_path: String,
    state: Option<V4l2State>,
    format: PixelFormat,
    frame_count: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            device_path: device_path(&config.device),
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Source: failed to set fps on {}: {}",
                self.device_path,
                err
            );
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.connected_at = Some(Instant::now());

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    /// A failed dequeue is end of stream: the device was unplugged or closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let buf = match captured {
            Ok(buf) => buf,
            Err(err) => {
                log::warn!("V4l2Source: capture from {} failed: {}", self.device_path, err);
                self.last_error = Some(err.to_string());
                return Ok(None);
            }
        };

        let pixels = normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)?;
        let timestamp = self
            .connected_at
            .map(|at| at.elapsed())
            .unwrap_or_default();
        let frame = Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            timestamp,
            self.frame_count,
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    pub fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device_path.clone(),
        }
    }

    pub fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.device_path);
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = (1000 / self.config.target_fps.max(1)).saturating_mul(6);
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_device_resolves_to_node() -> Result<()> {
        let source = V4l2Source::new(CameraConfig::default())?;
        assert_eq!(source.stats().device, "/dev/video0");
        assert_eq!(source.stats().frames_captured, 0);
        Ok(())
    }

    #[test]
    fn next_frame_requires_connect() -> Result<()> {
        let mut source = V4l2Source::new(CameraConfig::default())?;
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
