#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{Detection, DetectionResult, Joint, Keypoint, PoseSample};
use crate::frame::rgb_len;

type RunnableOnnx = TypedRunnableModel<TypedModel>;

const NMS_IOU_THRESHOLD: f32 = 0.45;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

fn load_model(model_path: &Path, fact: InferenceFact) -> Result<RunnableOnnx> {
    let model = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(0, fact)
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")?;
    Ok(model)
}

/// Stretch the frame to a square model input.
fn resize_square(pixels: &[u8], width: u32, height: u32, size: u32) -> Result<RgbImage> {
    let expected_len = rgb_len(width, height)?;
    if pixels.len() != expected_len {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected_len,
            pixels.len()
        ));
    }
    let image = RgbImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
    Ok(imageops::resize(
        &image,
        size,
        size,
        imageops::FilterType::Triangle,
    ))
}

// ----------------------------------------------------------------------------
// YOLOv8 object detector
// ----------------------------------------------------------------------------

/// YOLOv8 ONNX object detector.
///
/// Expects a `[1, 3, S, S]` float input and a `[1, 4 + classes, anchors]`
/// output of (cx, cy, w, h, class scores...) in input pixels. Boxes are
/// returned normalized to the frame; NMS is class-agnostic.
pub struct TractObjectBackend {
    model: RunnableOnnx,
    input_size: u32,
    confidence_threshold: f32,
}

impl TractObjectBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let size = input_size as usize;
        let model = load_model(
            model_path.as_ref(),
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )?;
        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
        })
    }

    /// Override the default pre-NMS confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let resized = resize_square(pixels, width, height, self.input_size)?;
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not [1, 4 + classes, anchors]")?;
        let rows = view.shape()[1];
        if rows <= 4 {
            return Err(anyhow!("model output has no class rows"));
        }
        let classes = rows - 4;
        let anchors = view.shape()[2];
        let scale = self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            let bbox = [
                ((cx - w / 2.0) / scale).clamp(0.0, 1.0),
                ((cy - h / 2.0) / scale).clamp(0.0, 1.0),
                ((cx + w / 2.0) / scale).clamp(0.0, 1.0),
                ((cy + h / 2.0) / scale).clamp(0.0, 1.0),
            ];
            let label = COCO_LABELS.get(best_class).copied().unwrap_or("unknown");
            candidates.push(Detection::new(label, best_score, bbox));
        }
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractObjectBackend {
    fn name(&self) -> &'static str {
        "tract-objects"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Objects)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::objects(self.decode(outputs)?))
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &cand.bbox) < iou_threshold)
        {
            kept.push(cand);
        }
    }
    kept
}

// ----------------------------------------------------------------------------
// MoveNet single-pose estimator
// ----------------------------------------------------------------------------

/// MoveNet single-pose ONNX estimator.
///
/// Expects a `[1, S, S, 3]` int32 input and a `[1, 1, 17, 3]` output of
/// (y, x, score) per joint in COCO order.
pub struct TractPoseBackend {
    model: RunnableOnnx,
    input_size: u32,
    min_pose_score: f32,
}

impl TractPoseBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let size = input_size as usize;
        let model = load_model(
            model_path.as_ref(),
            InferenceFact::dt_shape(i32::datum_type(), tvec!(1, size, size, 3)),
        )?;
        Ok(Self {
            model,
            input_size,
            min_pose_score: 0.2,
        })
    }

    /// Minimum mean keypoint score for a pose to be reported.
    pub fn with_min_pose_score(mut self, score: f32) -> Self {
        self.min_pose_score = score;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let resized = resize_square(pixels, width, height, self.input_size)?;
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as i32
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Option<PoseSample>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix4>()
            .context("model output was not [1, 1, 17, 3]")?;
        if view.shape()[2] < Joint::COUNT || view.shape()[3] < 3 {
            return Err(anyhow!("model output has too few keypoints"));
        }

        let mut sample = PoseSample::default();
        let mut total = 0.0;
        for joint in Joint::ALL {
            let k = joint.index();
            let kp = Keypoint::new(view[[0, 0, k, 1]], view[[0, 0, k, 0]], view[[0, 0, k, 2]]);
            total += kp.confidence;
            sample.set(joint, kp);
        }
        if total / (Joint::COUNT as f32) < self.min_pose_score {
            return Ok(None);
        }
        Ok(Some(sample))
    }
}

impl DetectorBackend for TractPoseBackend {
    fn name(&self) -> &'static str {
        "tract-pose"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Pose)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let poses = self.decode(outputs)?.into_iter().collect();
        Ok(DetectionResult::poses(poses))
    }
}
