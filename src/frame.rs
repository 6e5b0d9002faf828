//! Decoded frames and their image codecs.
//!
//! A `Frame` is immutable once it leaves the capture session. It is shared
//! with consumers as `Arc<Frame>`; anything that wants to draw on it takes a
//! private copy through [`Frame::to_image`].

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use std::fmt;
use std::sync::Arc;

/// Default JPEG quality for re-encoded frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Frame handle as shared between the distributor and consumers.
pub type SharedFrame = Arc<Frame>;

/// One decoded RGB8 image plus its capture metadata.
///
/// No `Clone` and no mutable pixel access.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    captured_at: DateTime<Utc>,
    sequence: u64,
}

impl Frame {
    /// Wrap packed RGB8 pixels. Fails when the buffer does not match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: DateTime<Utc>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
            sequence: 0,
        })
    }

    /// Decode a JPEG into a frame stamped with the current time.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let (pixels, width, height) = decode_jpeg(bytes)?;
        Self::new(pixels, width, height, Utc::now())
    }

    /// Stamp the capture-order sequence number. Only the capture session does this.
    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// ISO-8601 rendering of the capture time.
    pub fn captured_at_iso(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Position in capture order, starting at 1. Monotonic across reconnects.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `[height, width]`, matching the result payload's `frame_shape`.
    pub fn shape(&self) -> [u32; 2] {
        [self.height, self.width]
    }

    /// Private, mutable copy of the pixels for annotation.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame {} has inconsistent dimensions", self.sequence))
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.pixels, self.width, self.height, quality)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at_iso())
            .finish()
    }
}

/// Encode packed RGB8 pixels as JPEG.
pub fn encode_jpeg(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(pixels.len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(pixels, width, height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(buffer)
}

/// Decode a JPEG into packed RGB8 pixels.
pub fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128]);
            }
        }
        pixels
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0; 10], 4, 4, Utc::now()).is_err());
    }

    #[test]
    fn shape_is_height_then_width() -> Result<()> {
        let frame = Frame::new(gradient(32, 16), 32, 16, Utc::now())?;
        assert_eq!(frame.shape(), [16, 32]);
        Ok(())
    }

    #[test]
    fn private_copy_does_not_alias_frame() -> Result<()> {
        let frame = Frame::new(gradient(8, 8), 8, 8, Utc::now())?;
        let mut copy = frame.to_image()?;
        copy.put_pixel(0, 0, image::Rgb([255, 255, 255]));
        assert_eq!(&frame.pixels()[..3], &[0, 0, 128]);
        Ok(())
    }

    #[test]
    fn jpeg_encode_then_decode_keeps_dimensions() -> Result<()> {
        let frame = Frame::new(gradient(32, 24), 32, 24, Utc::now())?;
        let jpeg = frame.encode_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::from_jpeg(&jpeg)?;
        assert_eq!((decoded.width, decoded.height), (32, 24));
        Ok(())
    }

    #[test]
    fn iso_timestamp_is_utc() -> Result<()> {
        let frame = Frame::new(gradient(2, 2), 2, 2, Utc::now())?;
        assert!(frame.captured_at_iso().ends_with('Z'));
        Ok(())
    }
}
