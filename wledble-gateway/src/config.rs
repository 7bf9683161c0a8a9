//! Configuration for the gateway binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use wledble_core::ble::{
    ConnectionConfig, DEFAULT_MAX_WRITE_LEN, GattProfile, IDM_NAME_PREFIX, IDM_READ_CHARACTERISTIC,
    IDM_WRITE_CHARACTERISTIC, WriteMode,
};
use wledble_core::frame::scheduler::DEFAULT_MAX_FPS;
use wledble_core::{GatewayOptions, ScreenSize, WLED_DEFAULT_PORT};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// UDP side.
    pub gateway: GatewayConfig,
    /// BLE display.
    pub device: DeviceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// UDP listener and frame pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Interface to bind.
    pub host: String,
    /// UDP port WLED sources send to.
    pub port: u16,
    /// Display side length: 16, 32 or 64.
    pub screen_size: u32,
    /// Frame rate ceiling; 0 disables it.
    pub max_fps: f64,
    /// Pending updates between listener and worker.
    pub queue_capacity: usize,
    /// Seconds between stats log lines; 0 disables them.
    pub stats_interval_secs: u64,
}

/// Target display and transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address (or platform id). Discovered when unset.
    pub address: Option<String>,
    /// Advertised name prefix used by discovery.
    pub name_prefix: String,
    pub write_characteristic: Uuid,
    pub read_characteristic: Uuid,
    /// Largest single write in bytes.
    pub max_write_len: usize,
    pub chunk_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub connect_attempts: u32,
    /// Backoff after the first failed attempt, doubled after each.
    pub retry_backoff_ms: u64,
    pub scan_timeout_secs: u64,
    pub write_with_response: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: WLED_DEFAULT_PORT,
            screen_size: ScreenSize::default().into(),
            max_fps: DEFAULT_MAX_FPS,
            queue_capacity: 8,
            stats_interval_secs: 10,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            name_prefix: IDM_NAME_PREFIX.into(),
            write_characteristic: IDM_WRITE_CHARACTERISTIC,
            read_characteristic: IDM_READ_CHARACTERISTIC,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
            chunk_delay_ms: 50,
            settle_delay_ms: 10,
            connect_attempts: 3,
            retry_backoff_ms: 250,
            scan_timeout_secs: 5,
            write_with_response: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn default_toml() -> std::io::Result<String> {
        toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)
    }

    /// Configured screen size; unsupported values fall back to 32.
    pub fn screen_size(&self) -> ScreenSize {
        ScreenSize::try_from(self.gateway.screen_size).unwrap_or_else(|e| {
            warn!("{e}; using {}", ScreenSize::default());
            ScreenSize::default()
        })
    }

    pub fn to_gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            max_fps: self.gateway.max_fps,
            queue_capacity: self.gateway.queue_capacity.max(1),
        }
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        let d = &self.device;
        ConnectionConfig {
            connect_attempts: d.connect_attempts.max(1),
            retry_backoff: Duration::from_millis(d.retry_backoff_ms),
            chunk_delay: Duration::from_millis(d.chunk_delay_ms),
            settle_delay: Duration::from_millis(d.settle_delay_ms),
            write_mode: if d.write_with_response {
                WriteMode::WithResponse
            } else {
                WriteMode::WithoutResponse
            },
        }
    }

    pub fn to_profile(&self) -> GattProfile {
        GattProfile {
            write_characteristic: self.device.write_characteristic,
            read_characteristic: self.device.read_characteristic,
            max_write_len: self.device.max_write_len.max(1),
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.device.scan_timeout_secs.max(1))
    }

    /// `None` when periodic stats logging is disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.gateway.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
