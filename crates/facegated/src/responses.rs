//! JSON bodies returned by the D-Bus methods.
//!
//! Business-rule rejections become `success: false` (or the equivalent flag)
//! with a human-readable message; they are never D-Bus errors.

use facegate_core::{
    similarity, CosineMatcher, DetectedFace, Embedding, GalleryEntry, LivenessAssessment,
    LivenessMetrics, Matcher, Outcome, Registration, RegistrationOutcome, Rejection,
    SimilarityError, Verification,
};
use serde::Serialize;

const NO_FACE: &str = "No face detected";
const MULTIPLE_FACES: &str = "Multiple faces detected";
const MULTIPLE_FACES_SHOW_ONE: &str =
    "Multiple faces detected. Please ensure only one face is visible.";

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Face-count message for the detection-only operations.
fn face_count_message(rejection: &Rejection, multiple: &str) -> String {
    match rejection {
        Rejection::MultipleFacesDetected { .. } => multiple.into(),
        _ => NO_FACE.into(),
    }
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub face_detected: bool,
    pub num_faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
    pub message: String,
}

impl From<Outcome<DetectedFace>> for DetectResponse {
    fn from(outcome: Outcome<DetectedFace>) -> Self {
        match outcome {
            Outcome::Accepted(face) => Self {
                face_detected: true,
                num_faces: 1,
                confidence: Some(face.score),
                bbox: Some(face.bbox.to_array()),
                message: "Face detected successfully".into(),
            },
            Outcome::Rejected(r) => Self {
                face_detected: r.face_count() > 0,
                num_faces: r.face_count(),
                confidence: None,
                bbox: None,
                message: face_count_message(&r, MULTIPLE_FACES_SHOW_ONE),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub face_detected: bool,
    pub num_faces: usize,
    pub message: String,
}

impl From<Outcome<Embedding>> for EmbeddingResponse {
    fn from(outcome: Outcome<Embedding>) -> Self {
        match outcome {
            Outcome::Accepted(embedding) => Self {
                success: true,
                embedding: Some(embedding),
                face_detected: true,
                num_faces: 1,
                message: "Face embedding extracted successfully".into(),
            },
            Outcome::Rejected(r) => Self {
                success: false,
                embedding: None,
                face_detected: r.face_count() > 0,
                num_faces: r.face_count(),
                message: face_count_message(&r, MULTIPLE_FACES_SHOW_ONE),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub similarity: f64,
    pub is_match: bool,
    pub message: String,
}

/// Compare two raw embeddings; no dimensionality requirement beyond equal length.
pub fn compare(
    a: &[f64],
    b: &[f64],
    threshold: f32,
) -> Result<CompareResponse, SimilarityError> {
    let result = similarity::compare(&to_embedding(a), &to_embedding(b), threshold)?;
    let message = if result.is_match {
        "Faces match"
    } else {
        "Faces do not match"
    };
    Ok(CompareResponse {
        similarity: round_to(result.score as f64, 4),
        is_match: result.is_match,
        message: message.into(),
    })
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub message: String,
}

impl From<Outcome<Verification>> for VerifyResponse {
    fn from(outcome: Outcome<Verification>) -> Self {
        match outcome {
            Outcome::Accepted(Verification::Compared {
                verified,
                similarity,
            }) => Self {
                success: true,
                verified: Some(verified),
                similarity: Some(round_to(similarity as f64, 4)),
                embedding: None,
                message: if verified {
                    "Face verified".into()
                } else {
                    "Face not verified".into()
                },
            },
            Outcome::Accepted(Verification::Extracted(embedding)) => Self {
                success: true,
                verified: None,
                similarity: None,
                embedding: Some(embedding),
                message: "Face embedding extracted".into(),
            },
            Outcome::Rejected(r) => Self {
                success: false,
                verified: Some(false),
                similarity: None,
                embedding: None,
                message: face_count_message(&r, MULTIPLE_FACES),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsBody {
    pub face_ratio: f64,
    pub std_dev: f64,
    pub sharpness: f64,
}

impl From<&LivenessMetrics> for MetricsBody {
    fn from(m: &LivenessMetrics) -> Self {
        Self {
            face_ratio: round_to(m.face_ratio, 3),
            std_dev: round_to(m.intensity_std_dev, 2),
            sharpness: round_to(m.sharpness_variance, 2),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub is_live: bool,
    pub confidence: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsBody>,
}

impl From<Outcome<LivenessAssessment>> for LivenessResponse {
    fn from(outcome: Outcome<LivenessAssessment>) -> Self {
        match outcome {
            Outcome::Accepted(a) => Self {
                is_live: a.is_live,
                confidence: round_to(a.confidence as f64, 2),
                message: if a.is_live {
                    "Liveness check passed".into()
                } else {
                    "Liveness check failed".into()
                },
                metrics: a.metrics.as_ref().map(MetricsBody::from),
            },
            Outcome::Rejected(r) => Self {
                is_live: false,
                confidence: 0.0,
                message: face_count_message(&r, MULTIPLE_FACES),
                metrics: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_skipped: Option<bool>,
    pub message: String,
}

impl RegisterResponse {
    fn rejected(message: &str, liveness_confidence: Option<f64>) -> Self {
        Self {
            success: false,
            embedding: None,
            liveness_confidence,
            detection_confidence: None,
            liveness_skipped: None,
            message: message.into(),
        }
    }
}

impl From<RegistrationOutcome> for RegisterResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        let rejection = match outcome {
            Outcome::Accepted(Registration {
                embedding,
                detection_confidence,
                liveness_confidence,
                liveness_skipped,
                ..
            }) => {
                return Self {
                    success: true,
                    embedding: Some(embedding),
                    liveness_confidence: Some(round_to(liveness_confidence as f64, 2)),
                    detection_confidence: Some(detection_confidence),
                    liveness_skipped: Some(liveness_skipped),
                    message: "Face registered successfully".into(),
                };
            }
            Outcome::Rejected(r) => r,
        };

        match rejection {
            Rejection::NoFaceDetected => Self::rejected(
                "No face detected. Please ensure your face is clearly visible.",
                None,
            ),
            Rejection::MultipleFacesDetected { .. } => Self::rejected(
                "Multiple faces detected. Please ensure only you are in the frame.",
                None,
            ),
            Rejection::LowDetectionConfidence { .. } => Self::rejected(
                "Face detection confidence too low. \
                 Please improve lighting and face position.",
                None,
            ),
            Rejection::LivenessFailed { assessment } => Self::rejected(
                "Liveness check failed. Please ensure you are using a live camera feed.",
                Some(round_to(assessment.confidence as f64, 2)),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UniquenessResponse {
    pub is_unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    pub similarity: f64,
}

/// Duplicate check of `query` against `gallery` with an inclusive threshold.
///
/// An unusable query is an error rather than a "unique" verdict.
pub fn check_uniqueness(
    query: &[f64],
    gallery: &[GalleryEntry],
    threshold: f32,
) -> Result<UniquenessResponse, SimilarityError> {
    let result = CosineMatcher.best_match(&to_embedding(query), gallery, threshold)?;
    Ok(UniquenessResponse {
        is_unique: !result.matched,
        matched_id: result.entry_id.filter(|_| result.matched),
        similarity: round_to(result.similarity as f64, 4),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
    pub models_loaded: bool,
}

impl StatusResponse {
    pub fn new(models_loaded: bool) -> Self {
        Self {
            service: "Facegate Face Recognition Service",
            status: if models_loaded { "running" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            models_loaded,
        }
    }
}

/// Embeddings cross the bus as `f64`; the core works in `f32`.
///
/// Values beyond the `f32` range become infinite and are rejected as
/// non-finite by the similarity checks.
pub fn to_embedding(values: &[f64]) -> Embedding {
    Embedding::new(values.iter().map(|&v| v as f32).collect())
}
