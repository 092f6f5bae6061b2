//! Lossless tile image encoder.
//!
//! Elevation tiles cannot tolerate lossy compression: a single changed bit in
//! the red channel is a 256 m error. Tiles are therefore always written as
//! lossless WebP (default) or PNG.

use std::io::Cursor;

use bytes::Bytes;
use clap::ValueEnum;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Image container used for archived tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Webp,
    Png,
}

impl TileFormat {
    /// PMTiles tile type code.
    pub fn tile_type(&self) -> u8 {
        match self {
            TileFormat::Png => 2,
            TileFormat::Webp => 4,
        }
    }

    /// Inverse of [`TileFormat::tile_type`].
    pub fn from_tile_type(code: u8) -> Option<Self> {
        match code {
            2 => Some(TileFormat::Png),
            4 => Some(TileFormat::Webp),
            _ => None,
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            TileFormat::Png => ImageFormat::Png,
            TileFormat::Webp => ImageFormat::WebP,
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Encodes packed RGB grids into tile images and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileEncoder {
    format: TileFormat,
}

impl TileEncoder {
    pub fn new(format: TileFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    /// Compress a `size × size` RGB grid.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::GridLength`] if `rgb` is not `size² · 3` bytes, or
    /// [`TileError::EncodeError`] if the codec fails.
    pub fn encode(&self, rgb: &[u8], size: u32) -> Result<Bytes, TileError> {
        let expected = size as usize * size as usize * 3;
        if rgb.len() != expected {
            return Err(TileError::GridLength {
                expected,
                actual: rgb.len(),
            });
        }

        let mut output = Vec::new();
        let result = match self.format {
            TileFormat::Webp => WebPEncoder::new_lossless(&mut output).write_image(
                rgb,
                size,
                size,
                ExtendedColorType::Rgb8,
            ),
            TileFormat::Png => PngEncoder::new(&mut output).write_image(
                rgb,
                size,
                size,
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| TileError::EncodeError {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output))
    }

    /// Decode a tile image back into packed RGB bytes.
    ///
    /// The container is sniffed from the data, so archives written with
    /// either format can be read by any encoder.
    pub fn decode(&self, source: &[u8], expected_size: u32) -> Result<Vec<u8>, TileError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TileError::DecodeError {
                message: e.to_string(),
            })?;
        let img = reader.decode().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })?;

        if img.width() != expected_size || img.height() != expected_size {
            return Err(TileError::UnexpectedSize {
                width: img.width(),
                height: img.height(),
                expected: expected_size,
            });
        }

        Ok(img.to_rgb8().into_raw())
    }

    /// Image dimensions without decoding pixel data.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TileError> {
        let reader = ImageReader::with_format(Cursor::new(source), self.format.image_format());
        reader.into_dimensions().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
