use facegate_core::{Embedding, GalleryEntry, PipelineError, SimilarityError, Thresholds};
use serde::Serialize;
use zbus::fdo;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};
use crate::responses::{
    self, DetectResponse, EmbeddingResponse, LivenessResponse, RegisterResponse, StatusResponse,
    VerifyResponse,
};

pub const BUS_NAME: &str = "org.freedesktop.Facegate1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Facegate1";

/// D-Bus interface for the Facegate face biometric daemon.
///
/// Bus name: org.freedesktop.Facegate1
/// Object path: /org/freedesktop/Facegate1
///
/// Every method returns a JSON document. Business-rule rejections are
/// reported inside that document; malformed input maps to `InvalidArgs` and
/// engine faults to `Failed`.
pub struct FacegateService {
    /// `None` when the models failed to load at startup.
    engine: Option<EngineHandle>,
    thresholds: Thresholds,
}

impl FacegateService {
    pub fn new(engine: Option<EngineHandle>, thresholds: Thresholds) -> Self {
        Self { engine, thresholds }
    }

    fn engine(&self) -> fdo::Result<&EngineHandle> {
        self.engine
            .as_ref()
            .ok_or_else(|| to_fdo(EngineError::ModelUnavailable))
    }
}

#[interface(name = "org.freedesktop.Facegate1")]
impl FacegateService {
    /// Detect the single face in an encoded image.
    async fn detect(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "detect requested");
        let outcome = self.engine()?.detect(image).await.map_err(to_fdo)?;
        to_json(&DetectResponse::from(outcome))
    }

    /// Extract the embedding of the single face in an encoded image.
    async fn extract_embedding(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "extract_embedding requested");
        let outcome = self
            .engine()?
            .extract_embedding(image)
            .await
            .map_err(to_fdo)?;
        to_json(&EmbeddingResponse::from(outcome))
    }

    /// Cosine similarity between two embeddings at the match threshold.
    async fn compare(&self, embedding1: Vec<f64>, embedding2: Vec<f64>) -> fdo::Result<String> {
        tracing::info!(dim = embedding1.len(), "compare requested");
        let threshold = self.thresholds.match_threshold;
        let body = responses::compare(&embedding1, &embedding2, threshold)
            .map_err(similarity_to_fdo)?;
        to_json(&body)
    }

    /// Verify the face in an image against `stored_embedding` (JSON array,
    /// empty for none).
    async fn verify(&self, image: Vec<u8>, stored_embedding: &str) -> fdo::Result<String> {
        let stored = parse_stored_embedding(stored_embedding)?;
        tracing::info!(
            bytes = image.len(),
            has_stored = stored.is_some(),
            "verify requested"
        );
        let outcome = self
            .engine()?
            .verify(image, stored)
            .await
            .map_err(to_fdo)?;
        to_json(&VerifyResponse::from(outcome))
    }

    /// Single-image liveness heuristic.
    async fn liveness(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "liveness requested");
        let outcome = self.engine()?.liveness(image).await.map_err(to_fdo)?;
        to_json(&LivenessResponse::from(outcome))
    }

    /// Full registration gate chain.
    async fn register(&self, image: Vec<u8>, skip_liveness: bool) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), skip_liveness, "register requested");
        let outcome = self
            .engine()?
            .register(image, skip_liveness)
            .await
            .map_err(to_fdo)?;
        to_json(&RegisterResponse::from(outcome))
    }

    /// Check an embedding against a caller-supplied gallery
    /// (`[{"id": .., "embedding": [..]}]`). A threshold of zero or less uses
    /// the configured default.
    async fn check_uniqueness(
        &self,
        embedding: Vec<f64>,
        gallery: &str,
        threshold: f64,
    ) -> fdo::Result<String> {
        let gallery: Vec<GalleryEntry> = serde_json::from_str(gallery)
            .map_err(|e| invalid_embedding(format!("gallery: {e}")))?;
        let threshold = if threshold > 0.0 {
            threshold as f32
        } else {
            self.thresholds.uniqueness_threshold
        };
        tracing::info!(
            entries = gallery.len(),
            threshold,
            "check_uniqueness requested"
        );
        let body = responses::check_uniqueness(&embedding, &gallery, threshold)
            .map_err(similarity_to_fdo)?;
        to_json(&body)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        to_json(&StatusResponse::new(self.engine.is_some()))
    }
}

/// Empty or whitespace-only means no stored embedding.
fn parse_stored_embedding(raw: &str) -> fdo::Result<Option<Embedding>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let values: Vec<f32> = serde_json::from_str(raw)
        .map_err(|e| invalid_embedding(format!("stored_embedding: {e}")))?;
    Ok(Some(Embedding::new(values)))
}

fn invalid_embedding(detail: String) -> fdo::Error {
    tracing::warn!(%detail, "invalid embedding argument");
    fdo::Error::InvalidArgs(format!("invalid embedding JSON: {detail}"))
}

fn similarity_to_fdo(err: SimilarityError) -> fdo::Error {
    to_fdo(EngineError::Pipeline(PipelineError::Similarity(err)))
}

/// Caller-input faults become `InvalidArgs`; everything else is `Failed`.
fn to_fdo(err: EngineError) -> fdo::Error {
    match err {
        EngineError::Pipeline(PipelineError::Ingest(_))
        | EngineError::Pipeline(PipelineError::Similarity(_)) => {
            tracing::warn!(error = %err, "rejected invalid argument");
            fdo::Error::InvalidArgs(err.to_string())
        }
        other => {
            tracing::error!(error = %other, "request failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: Serialize>(body: &T) -> fdo::Result<String> {
    serde_json::to_string(body)
        .map_err(|e| fdo::Error::Failed(format!("serialize response: {e}")))
}
