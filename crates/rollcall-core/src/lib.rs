//! rollcall-core: face embedding and matching engine.
//!
//! Faces are found with SCRFD and embedded with ArcFace (ONNX Runtime, CPU).
//! Embeddings are compared by Euclidean distance, mapped to a [0, 1] score
//! and ranked against a gallery of enrolled students.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzeError, FaceAnalyzer, FaceSample, OnnxFaceAnalyzer, QualityGate};
pub use matcher::{
    Candidate, EuclideanMatcher, GalleryEntry, MatchReport, Matcher, Ranking,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_TOP_K,
};
pub use types::{score_from_distance, BoundingBox, Embedding, Landmarks};

/// SCRFD detection model file name.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Base directory for per-user data.
///
/// `$XDG_DATA_HOME`, falling back to `~/.local/share`.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}

/// Default location of the ONNX model files: `<data_home>/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_home().join("rollcall").join("models")
}
