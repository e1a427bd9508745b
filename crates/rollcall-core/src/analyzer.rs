//! Frame → embedding: detection, quality gating and recognition behind one trait.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// The face chosen from a frame and its embedding.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub face: BoundingBox,
    pub embedding: Embedding,
}

/// Something that can find a face in a frame and embed it.
pub trait FaceAnalyzer {
    /// Returns `None` when no usable face is present.
    fn analyze(&mut self, image: &RgbImage) -> Result<Option<FaceSample>, AnalyzeError>;
}

/// Rejects detections that are too uncertain or too small to embed reliably.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub min_confidence: f32,
    /// Minimum face side in pixels.
    pub min_face_size: f32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_face_size: 64.0,
        }
    }
}

impl QualityGate {
    /// Pick the most confident acceptable face. Input is assumed sorted by confidence.
    pub fn select<'a>(&self, faces: &'a [BoundingBox]) -> Option<&'a BoundingBox> {
        faces.iter().find(|f| {
            f.confidence >= self.min_confidence
                && f.min_side() >= self.min_face_size
                && f.landmarks.is_some()
        })
    }
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    gate: QualityGate,
}

impl OnnxFaceAnalyzer {
    /// `detection_threshold` filters raw SCRFD boxes; `gate` then picks the face to embed.
    pub fn load(
        scrfd_path: &str,
        arcface_path: &str,
        detection_threshold: f32,
        gate: QualityGate,
    ) -> Result<Self, AnalyzeError> {
        Ok(Self {
            detector: FaceDetector::load(scrfd_path)?.with_threshold(detection_threshold),
            recognizer: FaceRecognizer::load(arcface_path)?,
            gate,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Option<FaceSample>, AnalyzeError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = self.gate.select(&faces) else {
            tracing::debug!(detected = faces.len(), "no face passed the quality gate");
            return Ok(None);
        };
        let embedding = self.recognizer.extract(image, face)?;
        Ok(Some(FaceSample {
            face: face.clone(),
            embedding,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(confidence: f32, side: f32, with_landmarks: bool) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: side,
            height: side,
            confidence,
            landmarks: with_landmarks.then_some([(0.0, 0.0); 5]),
        }
    }

    #[test]
    fn test_gate_picks_first_acceptable() {
        let gate = QualityGate::default();
        let faces = vec![face(0.95, 20.0, true), face(0.9, 120.0, true), face(0.8, 200.0, true)];
        let chosen = gate.select(&faces).unwrap();
        assert_eq!(chosen.width, 120.0);
    }

    #[test]
    fn test_gate_rejects_low_confidence_and_missing_landmarks() {
        let gate = QualityGate::default();
        let faces = vec![face(0.99, 200.0, false), face(0.3, 200.0, true)];
        assert!(gate.select(&faces).is_none());
    }

    #[test]
    fn test_gate_empty() {
        assert!(QualityGate::default().select(&[]).is_none());
    }
}
