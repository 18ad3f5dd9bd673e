//! Verification and registration orchestrator.
//!
//! Every entry point walks a prefix or subset of one gate sequence:
//!
//! ```text
//! Start → Detected → SingleFaceChecked → QualityChecked
//!       → LivenessChecked → EmbeddingExtracted
//! ```
//!
//! | entry point | gates |
//! |---|---|
//! | `detect` | detection, single face |
//! | `extract_embedding` | detection, single face, embedding |
//! | `verify` | detection, single face, embedding, optional similarity |
//! | `liveness` | detection, single face, liveness heuristic |
//! | `register` | all of the above except similarity |
//!
//! A failed gate ends the walk with [`Outcome::Rejected`]. Rejections are
//! ordinary results; only undecodable input, engine faults and incomparable
//! embeddings are returned as [`PipelineError`].

use thiserror::Error;

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::ingest::{IngestError, PixelGrid};
use crate::liveness::{self, LivenessAssessment};
use crate::similarity::{self, SimilarityError};
use crate::thresholds::Thresholds;
use crate::types::{DetectedFace, Embedding};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

/// Last state reached before a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Detected,
    SingleFaceChecked,
    QualityChecked,
    LivenessChecked,
    EmbeddingExtracted,
}

/// Why a request was turned down by a business rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected")]
    MultipleFacesDetected { count: usize },
    #[error("face detection confidence {score:.3} below minimum")]
    LowDetectionConfidence { score: f32 },
    #[error("liveness check failed")]
    LivenessFailed { assessment: LivenessAssessment },
}

impl Rejection {
    /// The state whose outgoing gate rejected the request.
    pub fn stage(&self) -> Stage {
        match self {
            Rejection::NoFaceDetected | Rejection::MultipleFacesDetected { .. } => Stage::Detected,
            Rejection::LowDetectionConfidence { .. } => Stage::SingleFaceChecked,
            Rejection::LivenessFailed { .. } => Stage::QualityChecked,
        }
    }

    /// Number of faces the detector reported, when known at rejection time.
    pub fn face_count(&self) -> usize {
        match self {
            Rejection::NoFaceDetected => 0,
            Rejection::MultipleFacesDetected { count } => *count,
            Rejection::LowDetectionConfidence { .. } | Rejection::LivenessFailed { .. } => 1,
        }
    }
}

/// Result of a gate walk.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Accepted(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Outcome::Accepted(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Accepted(_) => None,
            Outcome::Rejected(r) => Some(r),
        }
    }
}

/// Verify either compares against the stored embedding or hands back the fresh one.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Compared { verified: bool, similarity: f32 },
    Extracted(Embedding),
}

/// Everything an accepted registration yields.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub embedding: Embedding,
    pub detection_confidence: f32,
    /// 1.0 when the liveness gate was skipped.
    pub liveness_confidence: f32,
    pub liveness_skipped: bool,
    /// The assessment behind `liveness_confidence`; `None` when skipped.
    pub liveness: Option<LivenessAssessment>,
}

pub type RegistrationOutcome = Outcome<Registration>;

/// Owns the analysis engine and runs the per-operation gate subsets.
pub struct Orchestrator<A> {
    analyzer: A,
    thresholds: Thresholds,
}

impl<A: FaceAnalyzer> Orchestrator<A> {
    pub fn new(analyzer: A, thresholds: Thresholds) -> Self {
        Self { analyzer, thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Detection only: report the single face, if there is exactly one.
    pub fn detect(&mut self, image: &[u8]) -> Result<Outcome<DetectedFace>, PipelineError> {
        Ok(match self.single_face(image)? {
            Outcome::Accepted((_, face)) => Outcome::Accepted(face),
            Outcome::Rejected(r) => Outcome::Rejected(r),
        })
    }

    /// Embedding of the single face, with no quality or liveness gates.
    pub fn extract_embedding(&mut self, image: &[u8]) -> Result<Outcome<Embedding>, PipelineError> {
        Ok(match self.single_face(image)? {
            Outcome::Accepted((_, face)) => Outcome::Accepted(face.embedding),
            Outcome::Rejected(r) => Outcome::Rejected(r),
        })
    }

    /// Embedding of the single face, compared against `stored` when given.
    ///
    /// Skips the quality and liveness gates. Uses the verify threshold, which
    /// is configured independently of the open compare threshold.
    pub fn verify(
        &mut self,
        image: &[u8],
        stored: Option<&Embedding>,
    ) -> Result<Outcome<Verification>, PipelineError> {
        let face = match self.single_face(image)? {
            Outcome::Accepted((_, face)) => face,
            Outcome::Rejected(r) => return Ok(Outcome::Rejected(r)),
        };

        let Some(stored) = stored else {
            return Ok(Outcome::Accepted(Verification::Extracted(face.embedding)));
        };

        let threshold = self.thresholds.verify_threshold;
        let result = similarity::compare(&face.embedding, stored, threshold)?;
        tracing::info!(similarity = result.score, verified = result.is_match, "verify: compared");
        Ok(Outcome::Accepted(Verification::Compared {
            verified: result.is_match,
            similarity: result.score,
        }))
    }

    /// Liveness heuristic on the single face. A spoof verdict is still an
    /// accepted outcome here; only the face-count gate rejects.
    pub fn liveness(&mut self, image: &[u8]) -> Result<Outcome<LivenessAssessment>, PipelineError> {
        Ok(match self.single_face(image)? {
            Outcome::Accepted((grid, face)) => {
                Outcome::Accepted(self.assess_liveness(&grid, &face))
            }
            Outcome::Rejected(r) => Outcome::Rejected(r),
        })
    }

    /// The full chain: single face, detection score, liveness, embedding.
    pub fn register(
        &mut self,
        image: &[u8],
        skip_liveness: bool,
    ) -> Result<RegistrationOutcome, PipelineError> {
        let (grid, face) = match self.single_face(image)? {
            Outcome::Accepted(found) => found,
            Outcome::Rejected(r) => return Ok(Outcome::Rejected(r)),
        };

        if face.score < self.thresholds.min_detection_score {
            return Ok(reject(Rejection::LowDetectionConfidence { score: face.score }));
        }

        let liveness = if skip_liveness {
            tracing::info!("register: liveness check skipped");
            None
        } else {
            let assessment = self.assess_liveness(&grid, &face);
            if !assessment.is_live {
                return Ok(reject(Rejection::LivenessFailed { assessment }));
            }
            Some(assessment)
        };

        tracing::info!(
            detection_confidence = face.score,
            liveness_skipped = skip_liveness,
            "register: accepted"
        );

        Ok(Outcome::Accepted(Registration {
            embedding: face.embedding,
            detection_confidence: face.score,
            liveness_confidence: liveness.as_ref().map_or(1.0, |a| a.confidence),
            liveness_skipped: skip_liveness,
            liveness,
        }))
    }

    /// Decode, detect, and require exactly one face.
    fn single_face(
        &mut self,
        image: &[u8],
    ) -> Result<Outcome<(PixelGrid, DetectedFace)>, PipelineError> {
        let grid = PixelGrid::decode(image)?;
        let mut faces = self.analyzer.detect(&grid)?;
        tracing::debug!(
            width = grid.width(),
            height = grid.height(),
            faces = faces.len(),
            "image analysed"
        );

        match faces.len() {
            0 => Ok(reject(Rejection::NoFaceDetected)),
            1 => match faces.pop() {
                Some(face) => Ok(Outcome::Accepted((grid, face))),
                None => Ok(reject(Rejection::NoFaceDetected)),
            },
            count => Ok(reject(Rejection::MultipleFacesDetected { count })),
        }
    }

    /// Liveness for the face region; an unusable box counts as a failed check.
    fn assess_liveness(&self, grid: &PixelGrid, face: &DetectedFace) -> LivenessAssessment {
        match liveness::assess(grid, &face.bbox, &self.thresholds.liveness) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(error = %e, "liveness: face region unusable");
                LivenessAssessment::unmeasurable()
            }
        }
    }
}

fn reject<T>(rejection: Rejection) -> Outcome<T> {
    tracing::info!(stage = ?rejection.stage(), reason = %rejection, "rejected");
    Outcome::Rejected(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    /// Returns a fixed set of faces and counts invocations.
    struct FakeAnalyzer {
        faces: Vec<DetectedFace>,
        calls: Rc<Cell<usize>>,
    }

    impl FakeAnalyzer {
        fn with(faces: Vec<DetectedFace>) -> Self {
            Self { faces, calls: Rc::new(Cell::new(0)) }
        }
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn detect(&mut self, _grid: &PixelGrid) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.faces.clone())
        }
    }

    /// Embeds the image content itself: mean intensity of 512 horizontal bands.
    struct ContentAnalyzer;

    impl FaceAnalyzer for ContentAnalyzer {
        fn detect(&mut self, grid: &PixelGrid) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let gray = grid.intensity();
            let values = (0..crate::EMBEDDING_DIM)
                .map(|i| {
                    let y = (i as u32 * gray.height()) / crate::EMBEDDING_DIM as u32;
                    let row: u32 = (0..gray.width()).map(|x| gray.get_pixel(x, y)[0] as u32).sum();
                    row as f32 / gray.width() as f32 + 1.0
                })
                .collect();
            Ok(vec![face(0.99, Embedding::new(values))])
        }
    }

    fn face(score: f32, embedding: Embedding) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::new(25.0, 25.0, 75.0, 75.0),
            score,
            landmarks: None,
            embedding,
        }
    }

    fn unit(i: usize) -> Embedding {
        let mut v = vec![0.0; crate::EMBEDDING_DIM];
        v[i] = 1.0;
        Embedding::new(v)
    }

    fn png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Sharp high-contrast texture: every liveness check passes on a 50×50 box.
    fn live_image() -> Vec<u8> {
        png(&RgbImage::from_fn(100, 100, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 230, 230])
            }
        }))
    }

    /// Flat grey: only the face-ratio check passes.
    fn flat_image() -> Vec<u8> {
        png(&RgbImage::from_pixel(100, 100, Rgb([128, 128, 128])))
    }

    fn orchestrator(faces: Vec<DetectedFace>) -> Orchestrator<FakeAnalyzer> {
        Orchestrator::new(FakeAnalyzer::with(faces), Thresholds::default())
    }

    #[test]
    fn test_zero_faces_rejected_everywhere() {
        let mut o = orchestrator(vec![]);
        let img = live_image();
        let expected = Rejection::NoFaceDetected;

        assert_eq!(o.detect(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.extract_embedding(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.verify(&img, Some(&unit(0))).unwrap().rejection(), Some(&expected));
        assert_eq!(o.liveness(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.register(&img, true).unwrap().rejection(), Some(&expected));
        assert_eq!(expected.to_string(), "no face detected");
    }

    #[test]
    fn test_multiple_faces_rejected_everywhere() {
        let mut o = orchestrator(vec![face(0.99, unit(0)), face(0.95, unit(1))]);
        let img = live_image();
        let expected = Rejection::MultipleFacesDetected { count: 2 };

        assert_eq!(o.detect(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.extract_embedding(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.verify(&img, None).unwrap().rejection(), Some(&expected));
        assert_eq!(o.liveness(&img).unwrap().rejection(), Some(&expected));
        assert_eq!(o.register(&img, false).unwrap().rejection(), Some(&expected));
        assert_eq!(expected.to_string(), "multiple faces detected");
        assert_eq!(expected.face_count(), 2);
        assert_eq!(expected.stage(), Stage::Detected);
    }

    #[test]
    fn test_corrupt_image_is_an_error_not_a_rejection() {
        let mut o = orchestrator(vec![face(0.99, unit(0))]);
        let err = o.register(b"\x89PNG garbage", false).unwrap_err();
        assert!(matches!(err, PipelineError::Ingest(IngestError::InvalidImage(_))));
        // The engine is never consulted for undecodable input
        assert_eq!(o.analyzer.calls.get(), 0);
    }

    #[test]
    fn test_detect_reports_single_face() {
        let mut o = orchestrator(vec![face(0.42, unit(3))]);
        let detected = o.detect(&flat_image()).unwrap().accepted().unwrap();
        assert_eq!(detected.score, 0.42);
        assert_eq!(detected.bbox, BoundingBox::new(25.0, 25.0, 75.0, 75.0));
    }

    #[test]
    fn test_extract_embedding_skips_quality_gates() {
        // Low score and flat image would fail registration, not extraction
        let mut o = orchestrator(vec![face(0.1, unit(7))]);
        let embedding = o.extract_embedding(&flat_image()).unwrap().accepted().unwrap();
        assert_eq!(embedding, unit(7));
    }

    #[test]
    fn test_verify_without_stored_embedding_returns_query() {
        let mut o = orchestrator(vec![face(0.1, unit(2))]);
        let v = o.verify(&flat_image(), None).unwrap().accepted().unwrap();
        assert_eq!(v, Verification::Extracted(unit(2)));
    }

    #[test]
    fn test_verify_against_stored_embedding() {
        let mut o = orchestrator(vec![face(0.1, unit(2))]);
        let same = o.verify(&flat_image(), Some(&unit(2))).unwrap().accepted().unwrap();
        assert_eq!(same, Verification::Compared { verified: true, similarity: 1.0 });

        let other = o.verify(&flat_image(), Some(&unit(5))).unwrap().accepted().unwrap();
        assert_eq!(other, Verification::Compared { verified: false, similarity: 0.0 });
    }

    #[test]
    fn test_verify_uses_its_own_threshold() {
        let thresholds = Thresholds { verify_threshold: 0.9, ..Thresholds::default() };
        let mut query = vec![0.0; crate::EMBEDDING_DIM];
        query[0] = 0.8;
        query[1] = 0.6;
        let analyzer = FakeAnalyzer::with(vec![face(0.9, Embedding::new(query))]);
        let mut o = Orchestrator::new(analyzer, thresholds);

        // similarity 0.8: a match at 0.5, not at 0.9
        match o.verify(&flat_image(), Some(&unit(0))).unwrap().accepted().unwrap() {
            Verification::Compared { verified, similarity } => {
                assert!(!verified);
                assert!((similarity - 0.8).abs() < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_verify_dimension_mismatch_is_an_error() {
        let mut o = orchestrator(vec![face(0.9, unit(0))]);
        let short = Embedding::new(vec![1.0; 128]);
        let err = o.verify(&flat_image(), Some(&short)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Similarity(SimilarityError::DimensionMismatch { left: 512, right: 128 })
        ));
    }

    #[test]
    fn test_liveness_entry_point() {
        let mut o = orchestrator(vec![face(0.3, unit(0))]);
        let live = o.liveness(&live_image()).unwrap().accepted().unwrap();
        assert!(live.is_live);
        assert_eq!(live.confidence, 1.0);

        let spoof = o.liveness(&flat_image()).unwrap().accepted().unwrap();
        assert!(!spoof.is_live);
        assert_eq!(spoof.confidence, 0.3);
    }

    #[test]
    fn test_liveness_with_unusable_box_fails_softly() {
        let mut off_image = face(0.99, unit(0));
        off_image.bbox = BoundingBox::new(500.0, 500.0, 600.0, 600.0);
        let mut o = orchestrator(vec![off_image]);

        let a = o.liveness(&live_image()).unwrap().accepted().unwrap();
        assert_eq!(a, LivenessAssessment::unmeasurable());

        match o.register(&live_image(), false).unwrap() {
            Outcome::Rejected(Rejection::LivenessFailed { assessment }) => {
                assert_eq!(assessment.confidence, 0.0)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_register_rejects_low_detection_score_regardless_of_liveness() {
        let mut o = orchestrator(vec![face(0.79, unit(0))]);
        for skip in [false, true] {
            let outcome = o.register(&live_image(), skip).unwrap();
            match outcome.rejection() {
                Some(Rejection::LowDetectionConfidence { score }) => assert_eq!(*score, 0.79),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_register_accepts_at_exact_minimum_score() {
        let mut o = orchestrator(vec![face(0.8, unit(4))]);
        let reg = o.register(&live_image(), false).unwrap().accepted().unwrap();
        assert_eq!(reg.embedding, unit(4));
        assert_eq!(reg.detection_confidence, 0.8);
        assert_eq!(reg.liveness_confidence, 1.0);
        assert!(!reg.liveness_skipped);
        assert!(reg.liveness.is_some());
    }

    #[test]
    fn test_register_rejects_spoof_with_confidence() {
        let mut o = orchestrator(vec![face(0.95, unit(0))]);
        let outcome = o.register(&flat_image(), false).unwrap();
        let rejection = outcome.rejection().cloned().unwrap();
        assert_eq!(rejection.stage(), Stage::QualityChecked);
        match rejection {
            Rejection::LivenessFailed { assessment } => {
                assert!(!assessment.is_live);
                assert_eq!(assessment.confidence, 0.3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_register_skip_liveness_ignores_image_statistics() {
        // Flat image would fail liveness
        let mut o = orchestrator(vec![face(0.95, unit(9))]);
        let reg = o.register(&flat_image(), true).unwrap().accepted().unwrap();
        assert_eq!(reg.liveness_confidence, 1.0);
        assert!(reg.liveness_skipped);
        assert!(reg.liveness.is_none());
        assert_eq!(reg.embedding, unit(9));
    }

    #[test]
    fn test_repeated_extraction_is_stable() {
        let mut o = Orchestrator::new(ContentAnalyzer, Thresholds::default());
        let img = live_image();
        let first = o.extract_embedding(&img).unwrap().accepted().unwrap();
        let second = o.extract_embedding(&img).unwrap().accepted().unwrap();
        assert!(first.similarity(&second).unwrap() > 0.99);
    }
}
