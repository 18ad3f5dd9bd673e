//! Cosine similarity between embeddings, match decisions, and gallery scans.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("cannot compare a zero-magnitude embedding")]
    ZeroVector,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`, clamped to [-1, 1].
///
/// Always processes every dimension so timing does not depend on where the
/// vectors differ.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !dot.is_finite() || !denom.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    if denom <= 0.0 {
        return Err(SimilarityError::ZeroVector);
    }
    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Strictly greater than: a score equal to the threshold is not a match.
pub fn is_match(score: f32, threshold: f32) -> bool {
    score > threshold
}

/// Score of one embedding pair plus the match decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub score: f32,
    pub is_match: bool,
}

/// Compare two embeddings against `threshold`.
pub fn compare(
    a: &Embedding,
    b: &Embedding,
    threshold: f32,
) -> Result<SimilarityResult, SimilarityError> {
    let score = a.similarity(b)?;
    Ok(SimilarityResult {
        score,
        is_match: is_match(score, threshold),
    })
}

/// A caller-supplied embedding with an opaque identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Best cosine similarity found, 0.0 when nothing was comparable.
    pub similarity: f32,
    /// ID of the matched entry (only when `matched`).
    pub entry_id: Option<String>,
}

/// Strategy for comparing a query embedding against a gallery.
pub trait Matcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, SimilarityError>;
}

/// Cosine matcher with full gallery traversal.
///
/// The query itself must be comparable: a zero or non-finite query, or one
/// whose length matches no gallery entry, is an error. Individual gallery
/// entries that cannot be compared are skipped. Iterates every entry (no
/// early exit) so timing leaks neither gallery size nor match position.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, SimilarityError> {
        check_query(query, gallery)?;

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in gallery.iter().enumerate() {
            let sim = match query.similarity(&entry.embedding) {
                Ok(sim) => sim,
                Err(e) => {
                    tracing::warn!(id = %entry.id, error = %e, "skipping gallery entry");
                    continue;
                }
            };
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }

        Ok(match best {
            Some((idx, sim)) if sim >= threshold => MatchResult {
                matched: true,
                similarity: sim,
                entry_id: Some(gallery[idx].id.clone()),
            },
            Some((_, sim)) => MatchResult {
                matched: false,
                similarity: sim,
                entry_id: None,
            },
            None => MatchResult {
                matched: false,
                similarity: 0.0,
                entry_id: None,
            },
        })
    }
}

fn check_query(query: &Embedding, gallery: &[GalleryEntry]) -> Result<(), SimilarityError> {
    if query.values.iter().any(|v| !v.is_finite()) {
        return Err(SimilarityError::NonFinite);
    }
    if query.values.iter().all(|&v| v == 0.0) {
        return Err(SimilarityError::ZeroVector);
    }
    match gallery.first() {
        Some(first) if gallery.iter().all(|e| e.embedding.len() != query.len()) => {
            Err(SimilarityError::DimensionMismatch {
                left: query.len(),
                right: first.embedding.len(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn entry(id: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry {
            id: id.into(),
            embedding: emb(values),
        }
    }

    #[test]
    fn test_cosine_identical() {
        let a = [0.3, -1.2, 4.0, 0.01];
        assert!((cosine(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_self_similarity_full_dimension() {
        let a: Vec<f32> = (0..crate::EMBEDDING_DIM)
            .map(|i| ((i * 7919) % 113) as f32 - 56.0)
            .collect();
        assert!((cosine(&a, &a).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_symmetric() {
        let a = [1.0, 2.0, 3.0, -4.0];
        let b = [0.5, -2.0, 7.0, 1.0];
        assert_eq!(cosine(&a, &b).unwrap(), cosine(&b, &a).unwrap());
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let s = cosine(&[1.0, 1.0], &[10.0, 10.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        assert_eq!(
            cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(SimilarityError::DimensionMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = [0.0, 0.0];
        let one = [1.0, 0.0];
        assert_eq!(cosine(&zero, &one), Err(SimilarityError::ZeroVector));
        assert_eq!(cosine(&one, &zero), Err(SimilarityError::ZeroVector));
    }

    #[test]
    fn test_cosine_empty_vectors_are_zero() {
        assert_eq!(cosine(&[], &[]), Err(SimilarityError::ZeroVector));
    }

    #[test]
    fn test_cosine_non_finite() {
        let one = [1.0, 0.0];
        let inf = [f32::INFINITY, 0.0];
        let nan = [f32::NAN, 1.0];
        assert_eq!(cosine(&inf, &one), Err(SimilarityError::NonFinite));
        assert_eq!(cosine(&one, &nan), Err(SimilarityError::NonFinite));
    }

    #[test]
    fn test_match_boundary_is_exclusive() {
        assert!(!is_match(0.5, 0.5));
        assert!(is_match(0.50001, 0.5));
        assert!(!is_match(0.49999, 0.5));
    }

    #[test]
    fn test_compare_applies_threshold() {
        // cos(60°)
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.5, 0.75f32.sqrt()]);
        let r = compare(&a, &b, 0.5).unwrap();
        assert!((r.score - 0.5).abs() < 1e-4);

        let c = emb(&[0.9, 0.1]);
        let r = compare(&a, &c, 0.5).unwrap();
        assert!(r.is_match);
        let r = compare(&a, &emb(&[0.0, 1.0]), 0.5).unwrap();
        assert!(!r.is_match);
    }

    #[test]
    fn test_matcher_scans_whole_gallery() {
        // Best match is the last entry
        let query = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("1", &[0.0, 1.0, 0.0]),
            entry("2", &[0.0, 0.0, 1.0]),
            entry("3", &[1.0, 0.0, 0.0]),
        ];
        let result = CosineMatcher.best_match(&query, &gallery, 0.6).unwrap();
        assert!(result.matched);
        assert_eq!(result.entry_id.as_deref(), Some("3"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_inclusive() {
        let query = emb(&[1.0, 0.0]);
        let gallery = vec![entry("a", &[1.0, 0.0])];
        let result = CosineMatcher.best_match(&query, &gallery, 1.0).unwrap();
        assert!(result.matched);
    }

    #[test]
    fn test_matcher_no_match() {
        let query = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![entry("1", &[0.0, 1.0, 0.0])];
        let result = CosineMatcher.best_match(&query, &gallery, 0.6).unwrap();
        assert!(!result.matched);
        assert!(result.entry_id.is_none());
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_skips_incomparable_entries() {
        let query = emb(&[1.0, 0.0]);
        let gallery = vec![
            entry("short", &[1.0]),
            entry("zero", &[0.0, 0.0]),
            entry("ok", &[0.8, 0.6]),
        ];
        let result = CosineMatcher.best_match(&query, &gallery, 0.6).unwrap();
        assert!(result.matched);
        assert_eq!(result.entry_id.as_deref(), Some("ok"));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = CosineMatcher.best_match(&emb(&[1.0, 0.0]), &[], 0.6).unwrap();
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_matcher_reports_negative_best_similarity() {
        let query = emb(&[1.0, 0.0]);
        let gallery = vec![entry("far", &[-1.0, 0.0]), entry("near", &[-0.6, 0.8])];
        let result = CosineMatcher.best_match(&query, &gallery, 0.6).unwrap();
        assert!(!result.matched);
        assert!(result.entry_id.is_none());
        assert!((result.similarity + 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_rejects_zero_query() {
        let gallery = vec![entry("alice", &[1.0, 0.0, 0.0, 0.0])];
        let query = emb(&[0.0; 4]);
        assert_eq!(
            CosineMatcher.best_match(&query, &gallery, 0.6),
            Err(SimilarityError::ZeroVector)
        );
    }

    #[test]
    fn test_matcher_rejects_query_matching_no_entry_length() {
        let gallery = vec![
            entry("alice", &[1.0, 0.0, 0.0, 0.0]),
            entry("bob", &[0.0, 1.0, 0.0, 0.0]),
        ];
        let query = emb(&[1.0, 0.0]);
        assert_eq!(
            CosineMatcher.best_match(&query, &gallery, 0.6),
            Err(SimilarityError::DimensionMismatch { left: 2, right: 4 })
        );
    }

    #[test]
    fn test_matcher_rejects_non_finite_query() {
        let gallery = vec![entry("alice", &[1.0, 0.0])];
        let query = emb(&[f32::INFINITY, 0.0]);
        assert_eq!(
            CosineMatcher.best_match(&query, &gallery, 0.6),
            Err(SimilarityError::NonFinite)
        );
    }
}
