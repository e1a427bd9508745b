//! SCRFD face detector via ONNX Runtime.
//!
//! Takes RGB webcam frames, letterboxes them to the 640×640 model input,
//! decodes the three anchor-free stride levels and applies NMS.

use crate::types::{BoundingBox, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::{DynValue, TensorRef};
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the source frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32, target: u32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, target);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: ((target - width) / 2) as f32,
            pad_y: ((target - height) / 2) as f32,
            width,
            height,
        }
    }

    /// Map a point in model-input space back to source frame space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw tensors for one stride level.
struct LevelTensors<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
    threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                names.len()
            )));
        }

        let levels = locate_outputs(&names);
        tracing::debug!(?levels, "SCRFD output mapping");

        Ok(Self {
            session,
            levels,
            threshold: DEFAULT_DETECTION_THRESHOLD,
        })
    }

    /// Override the minimum detection score.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Detect faces in an RGB frame, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
        let input = to_input_tensor(image, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (level, &stride) in self.levels.iter().zip(SCRFD_STRIDES.iter()) {
            let tensors = LevelTensors {
                scores: tensor_data(&outputs[level.score], "scores", stride)?,
                bboxes: tensor_data(&outputs[level.bbox], "bboxes", stride)?,
                kps: tensor_data(&outputs[level.kps], "kps", stride)?,
            };
            detections.extend(decode_level(&tensors, stride, &letterbox, self.threshold));
        }

        Ok(non_max_suppression(detections, SCRFD_NMS_THRESHOLD))
    }
}

fn tensor_data<'a>(value: &'a DynValue, what: &str, stride: usize) -> Result<&'a [f32], DetectorError> {
    value
        .try_extract_tensor::<f32>()
        .map(|(_, data)| data)
        .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
}

/// Resize into the letterbox and normalize into a 1×3×640×640 RGB tensor.
///
/// Padding is filled with the mean so it normalizes to zero.
fn to_input_tensor(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE as usize;
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let off_x = letterbox.pad_x as usize;
    let off_y = letterbox.pad_y as usize;

    for y in 0..size {
        for x in 0..size {
            let inside = x >= off_x
                && y >= off_y
                && x < off_x + letterbox.width as usize
                && y < off_y + letterbox.height as usize;
            for c in 0..3 {
                let value = if inside {
                    resized.get_pixel((x - off_x) as u32, (y - off_y) as u32)[c] as f32
                } else {
                    SCRFD_MEAN
                };
                tensor[[0, c, y, x]] = (value - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    tensor
}

/// Find each stride's score/bbox/kps outputs.
///
/// Exports that name their tensors `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name; anything else uses the standard positional layout
/// (scores 0–2, bboxes 3–5, kps 6–8).
fn locate_outputs(names: &[String]) -> [LevelOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<LevelOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(LevelOutputs {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    if let Some(levels) = named.and_then(|v| <[LevelOutputs; 3]>::try_from(v).ok()) {
        return levels;
    }

    tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
    std::array::from_fn(|i| LevelOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Decode one stride level into frame-space detections above `threshold`.
fn decode_level(
    tensors: &LevelTensors<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let Some(&score) = tensors.scores.get(idx) else {
            break;
        };
        if score <= threshold {
            continue;
        }
        let Some(offsets) = tensors.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source(ax - offsets[0] * step, ay - offsets[1] * step);
        let (x2, y2) = letterbox.to_source(ax + offsets[2] * step, ay + offsets[3] * step);

        let landmarks = tensors.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            let mut points: Landmarks = [(0.0, 0.0); 5];
            for (i, point) in points.iter_mut().enumerate() {
                *point = letterbox.to_source(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step);
            }
            points
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Greedy NMS; the result is sorted by descending confidence.
fn non_max_suppression(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
