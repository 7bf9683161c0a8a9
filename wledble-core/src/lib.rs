//! # wledble-core
//!
//! Bridge from WLED realtime UDP pixel streams to BLE LED matrix
//! displays of the iDotMatrix family.
//!
//! This crate contains:
//! - **WLED**: `parse` for DRGB, DRGBW and DNRGB datagrams
//! - **Frame**: `PixelBuffer`, `FrameScheduler` (rate limit + change
//!   detection), `StillImageEncoder` (PNG + device envelope)
//! - **BLE**: `ConnectionManager` over the `GattLink` and `LinkResolver`
//!   seams, with `btleplug` and in-memory implementations
//! - **Gateway**: `Gateway` tying the pieces together with a bounded
//!   single-worker queue and `GatewayStats`
//! - **Error**: `BridgeError`, a `thiserror`-based error type

pub mod ble;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod wled;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use ble::{
    ConnectionConfig, ConnectionManager, GattLink, GattProfile, LinkResolver, LinkState,
    SendReport, WriteMode,
};
pub use error::BridgeError;
pub use frame::{
    EncodedFrame, FrameDecision, FrameScheduler, PixelBuffer, RateLimit, Rgb, ScreenSize,
    StillImageEncoder,
};
pub use gateway::{Gateway, GatewayOptions, GatewayStats, StartOutcome};
pub use wled::{PixelUpdate, Protocol, WLED_DEFAULT_PORT, WledPacket};
