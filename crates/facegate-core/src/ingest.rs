//! Image ingestion: byte buffer → RGB pixel grid, plus intensity conversion.

use image::{GrayImage, Luma, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// A decoded RGB image. Immutable once built.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    image: RgbImage,
}

impl PixelGrid {
    /// Decode any raster format supported by the `image` crate.
    ///
    /// Fails on unparseable buffers and on images with a zero dimension.
    pub fn decode(bytes: &[u8]) -> Result<Self, IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::InvalidImage("empty buffer".into()));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| IngestError::InvalidImage(e.to_string()))?;
        Self::from_rgb(decoded.to_rgb8())
    }

    pub fn from_rgb(image: RgbImage) -> Result<Self, IngestError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(IngestError::InvalidImage(format!(
                "zero-sized image ({}x{})",
                image.width(),
                image.height()
            )));
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// Single-channel intensity of the whole grid.
    pub fn intensity(&self) -> GrayImage {
        intensity(&self.image)
    }
}

/// BT.601 luma (0.299 R + 0.587 G + 0.114 B), rounded to 8 bits.
///
/// `image`'s own `to_luma8` uses BT.709 weights, which shifts the variance
/// statistics the liveness thresholds were tuned against.
pub fn intensity(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([y.round().clamp(0.0, 255.0) as u8])
    })
}
