//! The image transformation primitive run inside the worker pool.

use std::fmt;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

/// Default re-encode quality on a 0-100 scale.
pub const DEFAULT_QUALITY: u8 = 60;

/// Why a single blob could not be transformed. Never fatal to the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformFailure {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("encode error: {0}")]
    EncodeError(String),
}

/// Container family of a transformed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Jpeg => write!(f, "jpeg"),
            ImageKind::Png => write!(f, "png"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
}

/// A pure bytes-in, bytes-out transformation. Runs on a blocking thread.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, bytes: &[u8]) -> Result<Transformed, TransformFailure>;
}

/// Re-encodes JPEG and PNG at a fixed quality, keeping the container family.
#[derive(Debug, Clone, Copy)]
pub struct ImageRecompressor {
    quality: u8,
}

impl Default for ImageRecompressor {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl ImageRecompressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>, TransformFailure> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode_image(&image.to_rgb8())
            .map_err(|e| TransformFailure::EncodeError(e.to_string()))?;
        Ok(out)
    }

    // PNG is lossless: the quality target only picks how hard to compress.
    fn encode_png(&self, image: &DynamicImage) -> Result<Vec<u8>, TransformFailure> {
        let compression = if self.quality >= 80 {
            CompressionType::Default
        } else {
            CompressionType::Best
        };
        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive);
        image
            .write_with_encoder(encoder)
            .map_err(|e| TransformFailure::EncodeError(e.to_string()))?;
        Ok(out)
    }
}

impl Transformer for ImageRecompressor {
    fn transform(&self, bytes: &[u8]) -> Result<Transformed, TransformFailure> {
        let format = image::guess_format(bytes)
            .map_err(|_| TransformFailure::UnsupportedFormat("unrecognized".into()))?;
        let kind = match format {
            ImageFormat::Jpeg => ImageKind::Jpeg,
            ImageFormat::Png => ImageKind::Png,
            other => {
                return Err(TransformFailure::UnsupportedFormat(
                    format!("{other:?}").to_lowercase(),
                ));
            }
        };

        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| TransformFailure::DecodeError(e.to_string()))?;

        let bytes = match kind {
            ImageKind::Jpeg => self.encode_jpeg(&image)?,
            ImageKind::Png => self.encode_png(&image)?,
        };
        Ok(Transformed { bytes, kind })
    }
}
