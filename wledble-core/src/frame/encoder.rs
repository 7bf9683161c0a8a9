//! Still-image encoder.
//!
//! Turns the full [`PixelBuffer`] into a lossless RGB PNG and wraps it
//! in the display's command envelope:
//!
//! - **Bitmap**: `N×N` RGB8 → PNG with fast deflate.
//! - **Envelope**: a [`PayloadEnvelope`] turns the PNG into the byte
//!   sequence the device accepts.
//!
//! Runs once per accepted frame, never per datagram.

use std::sync::Arc;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::error::BridgeError;
use crate::frame::buffer::PixelBuffer;

// ── PayloadEnvelope ──────────────────────────────────────────────

/// Wraps an encoded still image as a displayable device command.
pub trait PayloadEnvelope: Send + Sync {
    fn wrap(&self, png: &[u8]) -> Vec<u8>;
}

/// Image-upload command for iDotMatrix-style displays.
///
/// The PNG is split into blocks of at most [`BLOCK_SIZE`](Self::BLOCK_SIZE)
/// bytes. Each block gets a 9-byte little-endian header:
///
/// ```text
/// tag:       u16  (png_len + block_count, truncated)
/// reserved:  u16  (0)
/// continued: u8   (0 on the first block, 2 afterwards)
/// png_len:   u32
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageUploadEnvelope;

impl ImageUploadEnvelope {
    pub const BLOCK_SIZE: usize = 4096;
    pub const HEADER_SIZE: usize = 9;
}

impl PayloadEnvelope for ImageUploadEnvelope {
    fn wrap(&self, png: &[u8]) -> Vec<u8> {
        let block_count = png.len().div_ceil(Self::BLOCK_SIZE);
        let tag = (png.len() + block_count) as u16;
        let png_len = png.len() as u32;

        let mut out = Vec::with_capacity(png.len() + block_count * Self::HEADER_SIZE);
        for (idx, block) in png.chunks(Self::BLOCK_SIZE).enumerate() {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&[0, 0]);
            out.push(if idx == 0 { 0 } else { 2 });
            out.extend_from_slice(&png_len.to_le_bytes());
            out.extend_from_slice(block);
        }
        out
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// A frame ready for chunked transport.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Sequential frame number assigned by the encoder.
    pub frame_number: u64,
    /// Side length in pixels.
    pub side: u32,
    /// Size of the PNG before enveloping.
    pub image_len: usize,
    /// Enveloped payload.
    pub data: Vec<u8>,
}

// ── StillImageEncoder ────────────────────────────────────────────

pub struct StillImageEncoder {
    envelope: Arc<dyn PayloadEnvelope>,
    frame_count: u64,
    last_payload_len: usize,
}

impl StillImageEncoder {
    pub fn new(envelope: Arc<dyn PayloadEnvelope>) -> Self {
        Self {
            envelope,
            frame_count: 0,
            last_payload_len: 0,
        }
    }

    /// Encode the whole buffer and wrap it for the device.
    pub fn encode(&mut self, buffer: &PixelBuffer) -> Result<EncodedFrame, BridgeError> {
        let side = buffer.size().side() as u32;
        let png = encode_png(buffer)?;
        let data = self.envelope.wrap(&png);

        let frame = EncodedFrame {
            frame_number: self.frame_count,
            side,
            image_len: png.len(),
            data,
        };
        self.frame_count += 1;
        self.last_payload_len = frame.data.len();
        Ok(frame)
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Size of the most recent enveloped payload.
    pub fn last_payload_len(&self) -> usize {
        self.last_payload_len
    }
}

impl Default for StillImageEncoder {
    fn default() -> Self {
        Self::new(Arc::new(ImageUploadEnvelope))
    }
}

/// Lossless RGB8 PNG of the buffer.
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>, BridgeError> {
    let side = buffer.size().side() as u32;
    let mut png = Vec::new();
    PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::Adaptive)
        .write_image(buffer.as_bytes(), side, side, ExtendedColorType::Rgb8)?;
    Ok(png)
}

// ── Tests ────────────────────────────────────────────────────────
