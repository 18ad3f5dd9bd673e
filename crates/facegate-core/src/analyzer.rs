//! The narrow seam between the decision logic and the face analysis engine.

use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::ingest::PixelGrid;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Image in, zero or more faces out.
///
/// Ordering of the returned faces is engine-defined. An empty vector means no
/// face was found and is not an error. Implementations do not judge quality.
/// Takes `&mut self` because inference sessions are not reentrant; callers
/// serialize access.
pub trait FaceAnalyzer {
    fn detect(&mut self, grid: &PixelGrid) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect(&mut self, grid: &PixelGrid) -> Result<Vec<DetectedFace>, AnalyzerError> {
        (**self).detect(grid)
    }
}

/// SCRFD detection followed by ArcFace embedding of every detected face.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing or invalid.
    pub fn load(
        scrfd_path: &str,
        arcface_path: &str,
        intra_threads: usize,
    ) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path, intra_threads)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(arcface_path, intra_threads)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, grid: &PixelGrid) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let detections = self.detector.detect(grid)?;
        tracing::debug!(count = detections.len(), "faces detected");

        detections
            .into_iter()
            .map(|d| -> Result<DetectedFace, AnalyzerError> {
                let embedding = self.recognizer.extract(grid, d.landmarks.as_ref())?;
                Ok(DetectedFace {
                    bbox: d.bbox,
                    score: d.score,
                    landmarks: d.landmarks,
                    embedding,
                })
            })
            .collect()
    }
}
