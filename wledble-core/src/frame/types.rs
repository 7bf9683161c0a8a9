//! Shared types for the frame pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

// ── Rgb ──────────────────────────────────────────────────────────

/// One 24-bit pixel colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

// ── ScreenSize ───────────────────────────────────────────────────

/// Supported square matrix sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScreenSize {
    /// 16×16 pixels.
    S16,
    /// 32×32 pixels.
    #[default]
    S32,
    /// 64×64 pixels.
    S64,
}

impl ScreenSize {
    /// Side length in pixels.
    pub const fn side(self) -> usize {
        match self {
            ScreenSize::S16 => 16,
            ScreenSize::S32 => 32,
            ScreenSize::S64 => 64,
        }
    }

    /// Total number of pixels (`side²`).
    pub const fn pixel_count(self) -> usize {
        self.side() * self.side()
    }
}

impl TryFrom<u32> for ScreenSize {
    type Error = BridgeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(ScreenSize::S16),
            32 => Ok(ScreenSize::S32),
            64 => Ok(ScreenSize::S64),
            other => Err(BridgeError::InvalidScreenSize(other)),
        }
    }
}

impl From<ScreenSize> for u32 {
    fn from(size: ScreenSize) -> Self {
        size.side() as u32
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.side())
    }
}
