use serde::{Deserialize, Serialize};

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl BoundingBox {
    /// Length of the shorter side, in pixels.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Returns `None` when the vectors have different lengths or are empty;
    /// such pairs are not comparable.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }

    /// Similarity score in [0, 1] derived from Euclidean distance.
    pub fn match_score(&self, other: &Embedding) -> Option<f32> {
        self.euclidean_distance(other).map(score_from_distance)
    }

    /// Return a unit-length copy. A zero vector is returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }
}

/// Convert a Euclidean distance into a similarity score: `1 - d / 2`, clamped to [0, 1].
///
/// For unit-length embeddings the distance lies in [0, 2], so the clamp only
/// matters for unnormalized input.
pub fn score_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}
