//! GATT link abstraction.
//!
//! A [`GattLink`] is one live connection to the display exposing a
//! write characteristic and a read characteristic. [`BtleLink`] backs
//! it with a `btleplug` peripheral.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use tracing::debug;
use uuid::Uuid;

use crate::error::BridgeError;

/// Write characteristic of iDotMatrix displays.
pub const IDM_WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000fa02_0000_1000_8000_00805f9b34fb);
/// Read characteristic of iDotMatrix displays.
pub const IDM_READ_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000fa03_0000_1000_8000_00805f9b34fb);
/// Advertised name prefix of iDotMatrix displays.
pub const IDM_NAME_PREFIX: &str = "IDM-";

/// Fallback write size when the platform does not report one.
pub const DEFAULT_MAX_WRITE_LEN: usize = 244;

/// Upper bound for a single GATT connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── WriteMode ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    WithoutResponse,
    WithResponse,
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
            WriteMode::WithResponse => WriteType::WithResponse,
        }
    }
}

// ── GattProfile ──────────────────────────────────────────────────

/// Which characteristics to use and how large a single write may be.
#[derive(Debug, Clone)]
pub struct GattProfile {
    pub write_characteristic: Uuid,
    pub read_characteristic: Uuid,
    pub max_write_len: usize,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            write_characteristic: IDM_WRITE_CHARACTERISTIC,
            read_characteristic: IDM_READ_CHARACTERISTIC,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
        }
    }
}

// ── GattLink ─────────────────────────────────────────────────────

/// One live connection to the display.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Largest payload a single write may carry.
    fn max_write_len(&self) -> usize;

    /// Probe whether the underlying link is still up.
    async fn is_connected(&self) -> bool;

    /// Write one chunk to the write characteristic.
    async fn write(&self, chunk: &[u8], mode: WriteMode) -> Result<(), BridgeError>;

    /// Read the read characteristic once.
    async fn read(&self) -> Result<Vec<u8>, BridgeError>;

    /// Close the link.
    async fn disconnect(&self) -> Result<(), BridgeError>;
}

// ── BtleLink ─────────────────────────────────────────────────────

/// [`GattLink`] over a connected `btleplug` peripheral.
pub struct BtleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    read_char: Characteristic,
    max_write_len: usize,
}

impl BtleLink {
    /// Connect (if needed), discover services and locate the
    /// characteristics named by `profile`.
    pub async fn open(peripheral: Peripheral, profile: &GattProfile) -> Result<Self, BridgeError> {
        if !peripheral.is_connected().await? {
            tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
                .await
                .map_err(|_| BridgeError::Timeout(CONNECT_TIMEOUT))??;
        }
        peripheral.discover_services().await?;

        let find = |uuid: Uuid| {
            peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == uuid)
                .ok_or(BridgeError::CharacteristicNotFound(uuid))
        };
        let write_char = find(profile.write_characteristic)?;
        let read_char = find(profile.read_characteristic)?;

        debug!(
            "gatt link ready on {}: write={} read={}",
            peripheral.address(),
            write_char.uuid,
            read_char.uuid
        );

        Ok(Self {
            peripheral,
            write_char,
            read_char,
            max_write_len: profile.max_write_len.max(1),
        })
    }
}

#[async_trait]
impl GattLink for BtleLink {
    fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, chunk: &[u8], mode: WriteMode) -> Result<(), BridgeError> {
        self.peripheral
            .write(&self.write_char, chunk, mode.into())
            .await?;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, BridgeError> {
        Ok(self.peripheral.read(&self.read_char).await?)
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_targets_idm_characteristics() {
        let profile = GattProfile::default();
        assert_eq!(
            profile.write_characteristic.to_string(),
            "0000fa02-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            profile.read_characteristic.to_string(),
            "0000fa03-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn write_mode_maps_to_btleplug() {
        assert!(matches!(
            WriteType::from(WriteMode::WithResponse),
            WriteType::WithResponse
        ));
        assert!(matches!(
            WriteType::from(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        ));
    }
}
