//! Square RGB pixel buffer fed by WLED updates.
//!
//! Pixels are stored row-major as packed `R, G, B` bytes, so pixel
//! `(x, y)` lives at index `y * side + x`. Updates that run past the
//! end of the buffer are truncated, never wrapped.

use crate::frame::types::{Rgb, ScreenSize};
use crate::wled::{PixelUpdate, WledPacket};

const BYTES_PER_PIXEL: usize = 3;

/// The current content of the display.
///
/// Owned by a single processing lane; it is not shared between tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    size: ScreenSize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// A black buffer of the given size.
    pub fn new(size: ScreenSize) -> Self {
        Self {
            size,
            data: vec![0; size.pixel_count() * BYTES_PER_PIXEL],
        }
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    /// Number of addressable pixels.
    pub fn capacity(&self) -> usize {
        self.size.pixel_count()
    }

    /// Packed RGB bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Colour at linear index `idx`, or `None` past the end.
    pub fn pixel(&self, idx: usize) -> Option<Rgb> {
        let off = idx.checked_mul(BYTES_PER_PIXEL)?;
        let px = self.data.get(off..off + BYTES_PER_PIXEL)?;
        Some(Rgb::new(px[0], px[1], px[2]))
    }

    /// Colour at `(x, y)`, or `None` outside the grid.
    pub fn pixel_at(&self, x: usize, y: usize) -> Option<Rgb> {
        let side = self.size.side();
        if x >= side || y >= side {
            return None;
        }
        self.pixel(y * side + x)
    }

    /// Write `colors` in order from pixel `start`.
    ///
    /// Stops at the first index past the buffer. Returns the number of
    /// pixels written.
    pub fn write_from<I>(&mut self, start: usize, colors: I) -> usize
    where
        I: IntoIterator<Item = Rgb>,
    {
        let capacity = self.capacity();
        let mut written = 0;
        for (i, color) in colors.into_iter().enumerate() {
            let idx = match start.checked_add(i) {
                Some(idx) if idx < capacity => idx,
                _ => break,
            };
            let off = idx * BYTES_PER_PIXEL;
            self.data[off] = color.r;
            self.data[off + 1] = color.g;
            self.data[off + 2] = color.b;
            written += 1;
        }
        written
    }

    /// Apply a decoded datagram. Returns the number of pixels written.
    pub fn apply(&mut self, packet: &WledPacket<'_>) -> usize {
        self.write_from(packet.start, packet.colors())
    }

    /// Apply a queued update. Returns the number of pixels written.
    pub fn apply_update(&mut self, update: &PixelUpdate) -> usize {
        self.write_from(update.start, update.colors.iter().copied())
    }

    /// Reset every pixel to black.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wled::parse;

    #[test]
    fn new_buffer_is_black() {
        let buf = PixelBuffer::new(ScreenSize::S16);
        assert_eq!(buf.as_bytes().len(), 16 * 16 * 3);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn drgb_scenario_writes_first_two_pixels() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        let pkt = parse(&[2, 0, 255, 0, 0, 0, 255, 0]).unwrap();
        assert_eq!(buf.apply(&pkt), 2);
        assert_eq!(buf.pixel(0), Some(Rgb::new(255, 0, 0)));
        assert_eq!(buf.pixel(1), Some(Rgb::new(0, 255, 0)));
        assert_eq!(buf.pixel(2), Some(Rgb::BLACK));
    }

    #[test]
    fn dnrgb_scenario_leaves_pixel_zero_alone() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        buf.write_from(0, [Rgb::new(7, 7, 7)]);
        let pkt = parse(&[4, 0, 0, 1, 10, 20, 30]).unwrap();
        assert_eq!(buf.apply(&pkt), 1);
        assert_eq!(buf.pixel(0), Some(Rgb::new(7, 7, 7)));
        assert_eq!(buf.pixel(1), Some(Rgb::new(10, 20, 30)));
    }

    #[test]
    fn drgb_writes_min_of_k_and_capacity() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        let cap = buf.capacity();
        for k in [0usize, 1, 100, cap, cap + 50] {
            buf.clear();
            let mut pkt = vec![2u8, 0];
            for i in 0..k {
                pkt.extend_from_slice(&[(i % 251) as u8 + 1, 1, 1]);
            }
            let parsed = parse(&pkt).unwrap();
            assert_eq!(buf.apply(&parsed), k.min(cap));
            for i in 0..k.min(cap) {
                assert_eq!(buf.pixel(i), Some(Rgb::new((i % 251) as u8 + 1, 1, 1)));
            }
        }
    }

    #[test]
    fn dnrgb_stops_at_capacity_without_wrapping() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        let start = buf.capacity() - 2;
        let mut pkt = vec![4u8, 0];
        pkt.extend_from_slice(&(start as u16).to_be_bytes());
        for _ in 0..5 {
            pkt.extend_from_slice(&[9, 9, 9]);
        }
        let parsed = parse(&pkt).unwrap();
        assert_eq!(buf.apply(&parsed), 2);
        assert_eq!(buf.pixel(0), Some(Rgb::BLACK));
        assert_eq!(buf.pixel(1), Some(Rgb::BLACK));
        assert_eq!(buf.pixel(start + 1), Some(Rgb::new(9, 9, 9)));
    }

    #[test]
    fn dnrgb_start_past_end_writes_nothing() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        let pkt = parse(&[4, 0, 0xFF, 0xFF, 1, 2, 3]).unwrap();
        assert_eq!(buf.apply(&pkt), 0);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn drgbw_white_never_lands_in_buffer() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        let pkt = parse(&[3, 0, 10, 20, 30, 0xEE, 40, 50, 60, 0xEE]).unwrap();
        buf.apply(&pkt);
        assert!(!buf.as_bytes().contains(&0xEE));
        assert_eq!(buf.pixel(1), Some(Rgb::new(40, 50, 60)));
    }

    #[test]
    fn pixel_at_is_row_major() {
        let mut buf = PixelBuffer::new(ScreenSize::S16);
        buf.write_from(16 * 2 + 3, [Rgb::new(1, 2, 3)]);
        assert_eq!(buf.pixel_at(3, 2), Some(Rgb::new(1, 2, 3)));
        assert_eq!(buf.pixel_at(16, 0), None);
    }
}
