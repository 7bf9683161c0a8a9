//! Gateway counters and their serialisable snapshot.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared between the listener, the worker and callers
/// of [`Gateway::stats`](crate::gateway::Gateway::stats).
#[derive(Debug, Default)]
pub struct StatsCounters {
    running: AtomicBool,
    port: AtomicU16,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_skipped: AtomicU64,
    frames_failed: AtomicU64,
    fps_bits: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter and mark the gateway running on `port`.
    pub fn reset(&self, port: u16) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.frames_failed.store(0, Ordering::Relaxed);
        self.fps_bits.store(0f64.to_bits(), Ordering::Relaxed);
        self.port.store(port, Ordering::Relaxed);
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed transmission counts as skipped as well.
    pub fn record_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayStats {
        let fps = f64::from_bits(self.fps_bits.load(Ordering::Relaxed));
        GatewayStats {
            running: self.is_running(),
            fps: (fps * 10.0).round() / 10.0,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            port: self.port.load(Ordering::Relaxed),
        }
    }
}

// ── GatewayStats ─────────────────────────────────────────────────

/// Point-in-time view of the gateway counters.
///
/// `fps` is rounded to one decimal. `frames_failed` is a subset of
/// `frames_skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GatewayStats {
    pub running: bool,
    pub fps: f64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub frames_failed: u64,
    pub port: u16,
}

impl GatewayStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
