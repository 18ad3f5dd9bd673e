//! facegate-core: face biometric decisions on top of a face analysis engine.
//!
//! The engine (SCRFD detection + ArcFace embeddings via ONNX Runtime) sits
//! behind the [`FaceAnalyzer`] trait. Everything else here is decision logic:
//! cosine similarity, a single-image liveness heuristic, and the
//! [`Orchestrator`] that sequences the registration/verification gates.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod ingest;
pub mod liveness;
pub mod pipeline;
pub mod recognizer;
pub mod similarity;
pub mod thresholds;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use ingest::{IngestError, PixelGrid};
pub use liveness::{LivenessAssessment, LivenessMetrics};
pub use pipeline::{
    Orchestrator, Outcome, PipelineError, Registration, RegistrationOutcome, Rejection,
    Verification,
};
pub use similarity::{
    CosineMatcher, GalleryEntry, MatchResult, Matcher, SimilarityError, SimilarityResult,
};
pub use thresholds::{LivenessThresholds, Thresholds};
pub use types::{BoundingBox, DetectedFace, Embedding, EMBEDDING_DIM};

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/facegate/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("models")
}
