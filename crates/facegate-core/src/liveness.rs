//! Passive liveness heuristic from single-image statistics.
//!
//! Three independent checks over the detected face region, each either fully
//! granted or withheld:
//!
//! | check | passes when | weight |
//! |---|---|---|
//! | face ratio | `0.05 < face area / image area < 0.7` | 0.30 |
//! | texture | intensity standard deviation `> 20` | 0.35 |
//! | sharpness | variance of the 4-neighbour Laplacian `> 100` | 0.35 |
//!
//! The image is judged live when the summed confidence exceeds 0.6, i.e. when
//! any two checks pass.
//!
//! # Threat Coverage
//!
//! - **Blocks:** tiny or frame-filling re-photographed faces, flat low-contrast
//!   prints, blurry screen captures.
//! - **Does not block:** a sharp high-resolution printed photo under natural
//!   lighting, video replay, or 3D masks. This is a coarse proxy, not a
//!   security-grade anti-spoofing mechanism.

use image::{GenericImageView, GrayImage};
use serde::Serialize;
use thiserror::Error;

use crate::ingest::{self, PixelGrid};
use crate::thresholds::LivenessThresholds;
use crate::types::BoundingBox;

// Weights in hundredths so sums stay exact.
const FACE_RATIO_POINTS: u32 = 30;
const TEXTURE_POINTS: u32 = 35;
const SHARPNESS_POINTS: u32 = 35;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivenessError {
    #[error("face region {bbox:?} does not overlap the {width}x{height} image")]
    InvalidRegion {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },
}

/// Raw statistics the decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessMetrics {
    pub face_ratio: f64,
    pub intensity_std_dev: f64,
    pub sharpness_variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessAssessment {
    pub is_live: bool,
    /// Sum of granted weights: one of 0, 0.30, 0.35, 0.65, 0.70, 1.0.
    pub confidence: f32,
    /// Absent when the region could not be analysed.
    pub metrics: Option<LivenessMetrics>,
}

impl LivenessAssessment {
    /// Assessment for a region that could not be analysed at all.
    pub fn unmeasurable() -> Self {
        Self {
            is_live: false,
            confidence: 0.0,
            metrics: None,
        }
    }
}

/// Crop the face region and score it.
pub fn assess(
    grid: &PixelGrid,
    bbox: &BoundingBox,
    thresholds: &LivenessThresholds,
) -> Result<LivenessAssessment, LivenessError> {
    let (x, y, w, h) = crop_rect(bbox, grid.width(), grid.height())?;
    let region = ingest::intensity(&grid.as_rgb().view(x, y, w, h).to_image());

    let metrics = LivenessMetrics {
        face_ratio: (w as u64 * h as u64) as f64 / grid.area() as f64,
        intensity_std_dev: std_dev(&region),
        sharpness_variance: laplacian_variance(&region),
    };
    let assessment = score(metrics, thresholds);

    tracing::debug!(
        face_ratio = metrics.face_ratio,
        std_dev = metrics.intensity_std_dev,
        sharpness = metrics.sharpness_variance,
        confidence = assessment.confidence,
        is_live = assessment.is_live,
        "liveness assessed"
    );

    Ok(assessment)
}

/// Apply the three checks to precomputed metrics.
pub fn score(metrics: LivenessMetrics, thresholds: &LivenessThresholds) -> LivenessAssessment {
    let mut points = 0u32;
    let ratio = metrics.face_ratio;
    if ratio > thresholds.min_face_ratio && ratio < thresholds.max_face_ratio {
        points += FACE_RATIO_POINTS;
    }
    if metrics.intensity_std_dev > thresholds.min_intensity_std_dev {
        points += TEXTURE_POINTS;
    }
    if metrics.sharpness_variance > thresholds.min_sharpness_variance {
        points += SHARPNESS_POINTS;
    }

    let confidence = points as f32 / 100.0;
    LivenessAssessment {
        is_live: confidence > thresholds.min_live_confidence,
        confidence,
        metrics: Some(metrics),
    }
}

/// Truncate the box to integer pixels and clip it to the image.
///
/// Boxes that poke past the border are clipped; boxes with no overlap or
/// non-positive area are rejected.
fn crop_rect(
    bbox: &BoundingBox,
    width: u32,
    height: u32,
) -> Result<(u32, u32, u32, u32), LivenessError> {
    let invalid = || LivenessError::InvalidRegion { bbox: *bbox, width, height };

    let coords = bbox.to_array();
    if coords.iter().any(|c| !c.is_finite()) {
        return Err(invalid());
    }

    let x1 = (bbox.x1.trunc() as i64).clamp(0, width as i64);
    let y1 = (bbox.y1.trunc() as i64).clamp(0, height as i64);
    let x2 = (bbox.x2.trunc() as i64).clamp(0, width as i64);
    let y2 = (bbox.y2.trunc() as i64).clamp(0, height as i64);

    if x2 <= x1 || y2 <= y1 {
        return Err(invalid());
    }
    Ok((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

fn std_dev(gray: &GrayImage) -> f64 {
    let (_, variance) = mean_variance(gray.pixels().map(|p| p[0] as f64));
    variance.sqrt()
}

/// Variance of the 3×3 Laplacian `[0 1 0; 1 -4 1; 0 1 0]` response.
///
/// Borders are mirrored without repeating the edge pixel (`dcb|abcd|cba`).
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let at = |x: i64, y: i64| gray.get_pixel(mirror(x, w), mirror(y, h))[0] as f64;

    let responses = (0..h).flat_map(|y| {
        (0..w).map(move |x| {
            at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y)
        })
    });
    let (_, variance) = mean_variance(responses);
    variance
}

fn mirror(i: i64, len: i64) -> u32 {
    let i = if len == 1 {
        0
    } else if i < 0 {
        -i
    } else if i >= len {
        2 * len - 2 - i
    } else {
        i
    };
    i as u32
}

/// Population mean and variance in one pass (Welford).
fn mean_variance(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0u64;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for v in values {
        n += 1;
        let delta = v - mean;
        mean += delta / n as f64;
        m2 += delta * (v - mean);
    }
    if n == 0 {
        (0.0, 0.0)
    } else {
        (mean, m2 / n as f64)
    }
}
