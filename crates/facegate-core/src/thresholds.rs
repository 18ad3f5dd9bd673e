//! Decision thresholds for matching, registration and liveness.
//!
//! Every constant here is fixed (no calibration step); deployments may
//! override them through the daemon configuration.

use serde::Deserialize;

pub const MATCH_THRESHOLD: f32 = 0.5;
pub const VERIFY_THRESHOLD: f32 = 0.5;
pub const MIN_DETECTION_SCORE: f32 = 0.8;
pub const UNIQUENESS_THRESHOLD: f32 = 0.6;

pub const MIN_FACE_RATIO: f64 = 0.05;
pub const MAX_FACE_RATIO: f64 = 0.7;
pub const MIN_INTENSITY_STD_DEV: f64 = 20.0;
pub const MIN_SHARPNESS_VARIANCE: f64 = 100.0;
pub const MIN_LIVE_CONFIDENCE: f32 = 0.6;

/// Thresholds used by the orchestrator and the compare/uniqueness operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Open comparison of two embeddings: match iff similarity > this.
    pub match_threshold: f32,
    /// Verification against a stored embedding: verified iff similarity > this.
    pub verify_threshold: f32,
    /// Registration rejects faces with a detection score below this.
    pub min_detection_score: f32,
    /// Gallery uniqueness: a duplicate iff best similarity >= this.
    pub uniqueness_threshold: f32,
    pub liveness: LivenessThresholds,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            verify_threshold: VERIFY_THRESHOLD,
            min_detection_score: MIN_DETECTION_SCORE,
            uniqueness_threshold: UNIQUENESS_THRESHOLD,
            liveness: LivenessThresholds::default(),
        }
    }
}

/// Bounds for the three liveness sub-checks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LivenessThresholds {
    /// Face area / image area must lie strictly inside (min, max).
    pub min_face_ratio: f64,
    pub max_face_ratio: f64,
    pub min_intensity_std_dev: f64,
    pub min_sharpness_variance: f64,
    /// Live iff summed confidence > this.
    pub min_live_confidence: f32,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            min_face_ratio: MIN_FACE_RATIO,
            max_face_ratio: MAX_FACE_RATIO,
            min_intensity_std_dev: MIN_INTENSITY_STD_DEV,
            min_sharpness_variance: MIN_SHARPNESS_VARIANCE,
            min_live_confidence: MIN_LIVE_CONFIDENCE,
        }
    }
}
