//! Transmission gate for completed buffer updates.
//!
//! Every completed update is offered to the [`FrameScheduler`], which
//! accepts it for transmission only when:
//!
//! 1. at least the minimum interval has passed since the last accepted
//!    frame (rate limit), and
//! 2. the buffer fingerprint differs from the last accepted frame.
//!
//! Accepted frames feed a one-second FPS window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::frame::buffer::PixelBuffer;

/// Default ceiling of ~30 frames per second.
pub const DEFAULT_MAX_FPS: f64 = 30.0;

// ── RateLimit ────────────────────────────────────────────────────

/// Minimum inter-frame interval, adjustable while the gateway runs.
///
/// Shared between the control surface and the processing lane.
#[derive(Debug)]
pub struct RateLimit {
    min_interval_ns: AtomicU64,
}

impl RateLimit {
    pub fn new(max_fps: f64) -> Self {
        let limit = Self {
            min_interval_ns: AtomicU64::new(0),
        };
        limit.set_max_fps(max_fps);
        limit
    }

    /// Set the FPS ceiling. Zero, negative or non-finite values disable
    /// rate limiting.
    pub fn set_max_fps(&self, max_fps: f64) {
        let ns = if max_fps.is_finite() && max_fps > 0.0 {
            (1_000_000_000.0 / max_fps) as u64
        } else {
            0
        };
        self.min_interval_ns.store(ns, Ordering::Relaxed);
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_nanos(self.min_interval_ns.load(Ordering::Relaxed))
    }

    pub fn is_unlimited(&self) -> bool {
        self.min_interval_ns.load(Ordering::Relaxed) == 0
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FPS)
    }
}

// ── FrameSnapshot ────────────────────────────────────────────────

/// Content fingerprint of an accepted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub fingerprint: blake3::Hash,
    pub taken_at: Instant,
}

impl FrameSnapshot {
    pub fn of(buffer: &PixelBuffer, taken_at: Instant) -> Self {
        Self {
            fingerprint: blake3::hash(buffer.as_bytes()),
            taken_at,
        }
    }
}

// ── FrameDecision ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    /// Transmit the buffer.
    Send,
    /// Arrived inside the minimum interval.
    RateLimited,
    /// Identical to the last accepted frame.
    Unchanged,
}

impl FrameDecision {
    pub fn is_send(self) -> bool {
        matches!(self, FrameDecision::Send)
    }
}

// ── FpsMeter ─────────────────────────────────────────────────────

/// Counts accepted frames over consecutive windows.
#[derive(Debug)]
pub struct FpsMeter {
    window: Duration,
    window_start: Instant,
    count: u32,
    fps: f64,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1), Instant::now())
    }

    pub fn with_window(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            count: 0,
            fps: 0.0,
        }
    }

    /// Record one accepted frame. Returns the new rate when a window
    /// closes.
    pub fn record_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.fps = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Rate measured over the last closed window.
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ── FrameScheduler ───────────────────────────────────────────────

/// Decides which buffer states are worth transmitting.
pub struct FrameScheduler {
    rate: Arc<RateLimit>,
    last_sent_at: Option<Instant>,
    last_snapshot: Option<FrameSnapshot>,
    meter: FpsMeter,
}

impl FrameScheduler {
    pub fn new(rate: Arc<RateLimit>) -> Self {
        Self {
            rate,
            last_sent_at: None,
            last_snapshot: None,
            meter: FpsMeter::new(),
        }
    }

    /// Evaluate the buffer now.
    pub fn evaluate(&mut self, buffer: &PixelBuffer) -> FrameDecision {
        self.evaluate_at(buffer, Instant::now())
    }

    /// Evaluate with an explicit timestamp (useful for testing).
    ///
    /// On [`FrameDecision::Send`] the frame is recorded as the last
    /// accepted one before the caller transmits it.
    pub fn evaluate_at(&mut self, buffer: &PixelBuffer, now: Instant) -> FrameDecision {
        if let Some(last) = self.last_sent_at {
            if now.saturating_duration_since(last) < self.rate.min_interval() {
                return FrameDecision::RateLimited;
            }
        }

        let snapshot = FrameSnapshot::of(buffer, now);
        if let Some(prev) = &self.last_snapshot {
            if prev.fingerprint == snapshot.fingerprint {
                return FrameDecision::Unchanged;
            }
        }

        self.last_snapshot = Some(snapshot);
        self.last_sent_at = Some(now);
        if let Some(fps) = self.meter.record_at(now) {
            tracing::debug!("gateway fps: {fps:.1}");
        }
        FrameDecision::Send
    }

    /// Forget the last accepted fingerprint so identical content is
    /// eligible again. Used after a transmission failure.
    pub fn forget_last_frame(&mut self) {
        self.last_snapshot = None;
    }

    pub fn last_snapshot(&self) -> Option<&FrameSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn fps(&self) -> f64 {
        self.meter.fps()
    }

    pub fn rate_limit(&self) -> &Arc<RateLimit> {
        &self.rate
    }
}

// ── Tests ────────────────────────────────────────────────────────
