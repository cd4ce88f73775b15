//! Frame container and per-frame preprocessing.
//!
//! - `Frame`: RGB24 raster for one capture instant. Not `Clone`; the pipeline
//!   driver owns it for exactly one iteration and drops it afterwards.
//! - `Preprocess`: optional field-of-view adjustment applied before detection.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use std::time::Duration;

use crate::detect::{DetectionResult, DetectorBackend};

/// One captured RGB24 frame.
pub struct Frame {
    /// Packed RGB24 pixels, row-major.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Capture time relative to when the source connected.
    pub timestamp: Duration,

    /// Zero-based capture sequence number.
    pub sequence: u64,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp: Duration,
        sequence: u64,
    ) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Run a detector on this frame. The backend only borrows the pixels.
    pub fn run_detector(&self, backend: &mut dyn DetectorBackend) -> Result<DetectionResult> {
        backend.detect(&self.data, self.width, self.height)
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Preprocess: field-of-view adjustment
// ----------------------------------------------------------------------------

/// Preprocessing applied to every frame before detection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Preprocess {
    /// Pass frames through unchanged.
    #[default]
    Identity,
    /// Upscale by `factor`, then center-crop back to the input size.
    CropZoom { factor: f32 },
}

impl Preprocess {
    /// A zoom factor of exactly 1.0 is the identity.
    pub fn from_zoom(factor: f32) -> Result<Self> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(anyhow!("zoom factor must be >= 1.0, got {}", factor));
        }
        if factor == 1.0 {
            Ok(Preprocess::Identity)
        } else {
            Ok(Preprocess::CropZoom { factor })
        }
    }

    pub fn apply(&self, frame: Frame) -> Result<Frame> {
        match *self {
            Preprocess::Identity => Ok(frame),
            Preprocess::CropZoom { factor } => crop_zoom(frame, factor),
        }
    }
}

fn crop_zoom(frame: Frame, factor: f32) -> Result<Frame> {
    let Frame {
        data,
        width,
        height,
        timestamp,
        sequence,
    } = frame;
    let image = RgbImage::from_raw(width, height, data)
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;

    let scaled_w = ((width as f32) * factor).round().max(width as f32) as u32;
    let scaled_h = ((height as f32) * factor).round().max(height as f32) as u32;
    let scaled = imageops::resize(&image, scaled_w, scaled_h, imageops::FilterType::Triangle);

    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    let cropped = imageops::crop_imm(&scaled, x, y, width, height).to_image();

    Frame::new(cropped.into_raw(), width, height, timestamp, sequence)
}
