//! Domain-specific error types for the bridge.
//!
//! All fallible operations return `Result<T, BridgeError>`.
//! Connection failures are kept apart from mid-sequence write failures
//! so callers can decide whether a retry makes sense.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// The canonical error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Configuration Errors ─────────────────────────────────────
    /// Screen side length is not one of the supported matrix sizes.
    #[error("unsupported screen size: {0} (expected 16, 32 or 64)")]
    InvalidScreenSize(u32),

    /// `connect` was called before a device address was bound.
    #[error("device address is not set")]
    AddressNotSet,

    // ── Connection Errors ────────────────────────────────────────
    /// An operation needed a live link but there is none.
    #[error("device is not connected")]
    NotConnected,

    /// No resolver could locate the device.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// Every connect attempt failed.
    #[error("connect to {address} failed after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        address: String,
        attempts: u32,
        reason: String,
    },

    /// The device does not expose a required GATT characteristic.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// No local Bluetooth adapter is available.
    #[error("no bluetooth adapter available")]
    NoAdapter,

    // ── Transport Errors ─────────────────────────────────────────
    /// A chunk write failed; the remaining chunks were not sent.
    #[error("write failed at chunk {chunk}/{total}: {reason}")]
    WriteFailed {
        chunk: usize,
        total: usize,
        reason: String,
    },

    /// The BLE backend reported an error.
    #[error("ble error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The UDP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The operation was interrupted by a shutdown request.
    #[error("operation cancelled")]
    Cancelled,

    // ── Encoding Errors ──────────────────────────────────────────
    /// The still image could not be produced.
    #[error("image encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether the failure happened while establishing the link, as
    /// opposed to while using an established one.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::AddressNotSet
                | Self::DeviceNotFound(_)
                | Self::ConnectFailed { .. }
                | Self::NoAdapter
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

impl From<image::ImageError> for BridgeError {
    fn from(e: image::ImageError) -> Self {
        BridgeError::Encoding(e.to_string())
    }
}
