//! Frame decoder.
//!
//! Turns a [`RawFrame`] received from an adapter into a landscape RGBA8
//! [`DecodedImage`]. Decoding is a pure function of the payload and the
//! quality level, so identical inputs always yield identical pixels.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbImage, RgbaImage, imageops};

use crate::error::DecodeError;
use crate::frame::types::{DecodedImage, PayloadFormat, RawFrame};

/// Largest accepted edge length; the console's screens are 400 px wide.
pub const MAX_DIMENSION: u32 = 2048;

/// At or above this quality level decoded channels keep all 8 bits.
pub const FULL_DEPTH_QUALITY: u8 = 90;

// ── FrameDecoder ─────────────────────────────────────────────────

/// Stateless decoder for JPEG, TGA and raw RGB payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw`, consuming it.
    ///
    /// `quality` (10..=100) only affects lossy-compressed payloads: below
    /// [`FULL_DEPTH_QUALITY`] each colour channel is truncated to
    /// [`significant_bits`] bits.
    pub fn decode(&self, raw: RawFrame, quality: u8) -> Result<DecodedImage, DecodeError> {
        let RawFrame {
            screen,
            sequence,
            format,
            portrait,
            payload,
        } = raw;

        let mut pixels = match format {
            PayloadFormat::Jpeg => decode_encoded(&payload, ImageFormat::Jpeg, format)?,
            PayloadFormat::Tga => decode_encoded(&payload, ImageFormat::Tga, format)?,
            PayloadFormat::Rgb8 { width, height } => decode_rgb8(payload, width, height)?,
        };
        check_dimensions(pixels.width(), pixels.height())?;

        if portrait {
            pixels = imageops::rotate270(&pixels);
        }
        if format.is_compressed() {
            reduce_depth(&mut pixels, quality);
        }

        Ok(DecodedImage {
            screen,
            sequence,
            pixels,
        })
    }
}

/// Bits kept per colour channel at the given quality level.
///
/// `10 → 3`, `26 → 4`, `42 → 5`, `58 → 6`, `74 → 7`, `≥ 90 → 8`.
pub fn significant_bits(quality: u8) -> u8 {
    if quality >= FULL_DEPTH_QUALITY {
        8
    } else {
        3 + quality.saturating_sub(10) / 16
    }
}

// ── Internal ─────────────────────────────────────────────────────

fn check_dimensions(width: u32, height: u32) -> Result<(), DecodeError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(DecodeError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn decode_encoded(
    payload: &[u8],
    image_format: ImageFormat,
    format: PayloadFormat,
) -> Result<RgbaImage, DecodeError> {
    let malformed = |e: image::ImageError| DecodeError::Malformed {
        format: format.name(),
        reason: e.to_string(),
    };

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);

    let mut reader = ImageReader::with_format(Cursor::new(payload), image_format);
    reader.limits(limits);
    let image = reader.decode().map_err(malformed)?;
    Ok(image.into_rgba8())
}

fn decode_rgb8(payload: Vec<u8>, width: u32, height: u32) -> Result<RgbaImage, DecodeError> {
    check_dimensions(width, height)?;
    let expected = width as usize * height as usize * 3;
    if payload.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }
    let rgb = RgbImage::from_raw(width, height, payload).ok_or(DecodeError::LengthMismatch {
        expected,
        actual: 0,
    })?;
    Ok(DynamicImage::ImageRgb8(rgb).into_rgba8())
}

fn reduce_depth(pixels: &mut RgbaImage, quality: u8) {
    let bits = significant_bits(quality);
    if bits >= 8 {
        return;
    }
    let mask = 0xFFu8 << (8 - bits);
    for px in pixels.pixels_mut() {
        for c in &mut px.0[..3] {
            *c &= mask;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
