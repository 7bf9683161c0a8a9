//! WLED realtime UDP packet parser.
//!
//! Decodes a single datagram into a borrowed [`WledPacket`] without
//! copying pixel data. Unknown or truncated datagrams are ignored;
//! they are never an error.
//!
//! ## Wire format
//!
//! ```text
//! DRGB   (2): [2, timeout, R, G, B, R, G, B, ...]
//! DRGBW  (3): [3, timeout, R, G, B, W, R, G, B, W, ...]
//! DNRGB  (4): [4, timeout, start_hi, start_lo, R, G, B, ...]
//! ```
//!
//! Trailing bytes that do not complete a pixel are dropped.

use std::fmt;

use tracing::debug;

use crate::frame::Rgb;

/// Default UDP port of the WLED realtime protocol.
pub const WLED_DEFAULT_PORT: u16 = 21324;

// ── Protocol ─────────────────────────────────────────────────────

/// The pixel format carried by a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    /// RGB triples from pixel 0.
    Drgb = 2,
    /// RGBW quads from pixel 0; the white channel is discarded.
    Drgbw = 3,
    /// RGB triples from a big-endian start index.
    Dnrgb = 4,
}

impl Protocol {
    /// Bytes consumed by one pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Protocol::Drgb | Protocol::Dnrgb => 3,
            Protocol::Drgbw => 4,
        }
    }

    /// Length of the header preceding the pixel data.
    pub const fn header_len(self) -> usize {
        match self {
            Protocol::Drgb | Protocol::Drgbw => 2,
            Protocol::Dnrgb => 4,
        }
    }
}

impl TryFrom<u8> for Protocol {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Protocol::Drgb),
            3 => Ok(Protocol::Drgbw),
            4 => Ok(Protocol::Dnrgb),
            other => Err(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Drgb => write!(f, "DRGB"),
            Protocol::Drgbw => write!(f, "DRGBW"),
            Protocol::Dnrgb => write!(f, "DNRGB"),
        }
    }
}

// ── WledPacket ───────────────────────────────────────────────────

/// A decoded pixel update borrowing the datagram it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WledPacket<'a> {
    /// Pixel format tag.
    pub protocol: Protocol,
    /// Realtime timeout in seconds as sent by the source. Unused.
    pub timeout: u8,
    /// Index of the first pixel this packet writes.
    pub start: usize,
    data: &'a [u8],
}

impl<'a> WledPacket<'a> {
    /// Number of complete pixels carried by the packet.
    pub fn pixel_count(&self) -> usize {
        self.data.len() / self.protocol.bytes_per_pixel()
    }

    /// Colours in wire order. White channels are dropped.
    pub fn colors(&self) -> impl Iterator<Item = Rgb> + 'a {
        self.data
            .chunks_exact(self.protocol.bytes_per_pixel())
            .map(|px| Rgb::new(px[0], px[1], px[2]))
    }

    /// Convert into an owned update, detached from the datagram buffer.
    pub fn to_update(&self) -> PixelUpdate {
        PixelUpdate {
            protocol: self.protocol,
            start: self.start,
            colors: self.colors().collect(),
        }
    }
}

/// Parse a raw datagram.
///
/// Returns `None` for datagrams shorter than the protocol header or
/// with an unknown protocol id.
pub fn parse(datagram: &[u8]) -> Option<WledPacket<'_>> {
    if datagram.len() < 2 {
        return None;
    }

    let protocol = match Protocol::try_from(datagram[0]) {
        Ok(p) => p,
        Err(id) => {
            debug!("ignoring unknown WLED protocol id {id}");
            return None;
        }
    };

    if datagram.len() < protocol.header_len() {
        debug!("ignoring truncated {protocol} packet ({} bytes)", datagram.len());
        return None;
    }

    let start = match protocol {
        Protocol::Dnrgb => u16::from_be_bytes([datagram[2], datagram[3]]) as usize,
        Protocol::Drgb | Protocol::Drgbw => 0,
    };

    Some(WledPacket {
        protocol,
        timeout: datagram[1],
        start,
        data: &datagram[protocol.header_len()..],
    })
}

// ── PixelUpdate ──────────────────────────────────────────────────

/// An owned pixel update, queued between the UDP listener and the
/// processing worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelUpdate {
    pub protocol: Protocol,
    pub start: usize,
    pub colors: Vec<Rgb>,
}

// ── Tests ────────────────────────────────────────────────────────
