//! Display connection manager.
//!
//! Owns the single logical BLE connection: address binding, connect
//! with bounded retry, link-loss detection, chunked writes and reads.
//! The live link sits behind an async mutex that is held for an entire
//! chunked write, so two payloads can never interleave on the wire.
//!
//! Share it between components as an `Arc<ConnectionManager>`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::link::{GattLink, WriteMode};
use crate::ble::resolver::LinkResolver;
use crate::ble::state::LinkState;
use crate::error::BridgeError;

// ── ConnectionConfig ─────────────────────────────────────────────

/// Retry and pacing parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connect attempts before giving up (at least 1).
    pub connect_attempts: u32,
    /// Delay after the first failed attempt; doubled after each.
    pub retry_backoff: Duration,
    /// Pause between consecutive chunks.
    pub chunk_delay: Duration,
    /// Pause after the final chunk.
    pub settle_delay: Duration,
    /// Write type used by [`ConnectionManager::send`].
    pub write_mode: WriteMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            chunk_delay: Duration::from_millis(50),
            settle_delay: Duration::from_millis(10),
            write_mode: WriteMode::WithoutResponse,
        }
    }
}

// ── SendReport ───────────────────────────────────────────────────

/// Outcome of a complete payload transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub bytes: usize,
    pub chunks: usize,
    pub chunk_size: usize,
}

// ── ConnectionManager ────────────────────────────────────────────

struct Inner {
    address: Option<String>,
    link: Option<Box<dyn GattLink>>,
    state: LinkState,
}

pub struct ConnectionManager {
    inner: Mutex<Inner>,
    resolvers: Vec<Box<dyn LinkResolver>>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Create a manager trying `resolvers` in order of preference.
    pub fn new(resolvers: Vec<Box<dyn LinkResolver>>, config: ConnectionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                address: None,
                link: None,
                state: LinkState::Unbound,
            }),
            resolvers,
            config,
        }
    }

    /// Convenience constructor returning a shareable handle.
    pub fn shared(resolvers: Vec<Box<dyn LinkResolver>>, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self::new(resolvers, config))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state.clone()
    }

    pub async fn address(&self) -> Option<String> {
        self.inner.lock().await.address.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.state.is_connected()
    }

    /// Set the target device. Does not connect.
    ///
    /// Binding a different address while connected closes the old link.
    pub async fn bind_address(&self, address: impl Into<String>) {
        let address = address.into();
        let mut inner = self.inner.lock().await;

        let changed = inner.address.as_deref() != Some(address.as_str());
        if changed && inner.state.is_connected() {
            info!("target changed; closing link to previous device");
            Self::close_link(&mut inner).await;
        }

        debug!("bound device address {address}");
        inner.address = Some(address);
        inner.state.bind();
    }

    /// Establish the link if there is none.
    ///
    /// A no-op when already connected. Otherwise every resolver is
    /// tried in order, up to `connect_attempts` times with exponential
    /// backoff. On failure the state is `Disconnected` and the error is
    /// returned for the caller to retry later.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_connected() && inner.link.is_some() {
            return Ok(());
        }

        let Some(address) = inner.address.clone() else {
            warn!("connect requested but no device address is set");
            return Err(BridgeError::AddressNotSet);
        };

        let attempts = self.config.connect_attempts.max(1);
        let mut backoff = self.config.retry_backoff;
        let mut last_error = BridgeError::DeviceNotFound(address.clone());

        for attempt in 1..=attempts {
            match self.try_resolvers(&address).await {
                Ok(link) => {
                    inner.link = Some(link);
                    inner.state.connected()?;
                    info!("connected to {address} (attempt {attempt}/{attempts})");
                    return Ok(());
                }
                Err(e) => {
                    warn!("connect attempt {attempt}/{attempts} to {address} failed: {e}");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        inner.link = None;
        inner.state.disconnected();
        Err(BridgeError::ConnectFailed {
            address,
            attempts,
            reason: last_error.to_string(),
        })
    }

    /// Close the link if there is one. Idempotent.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        Self::close_link(&mut inner).await;
    }

    /// Send a payload with the configured write mode.
    pub async fn send(&self, data: &[u8]) -> Result<SendReport, BridgeError> {
        self.send_with(data, self.config.write_mode, &CancellationToken::new())
            .await
    }

    /// Send a payload as ordered chunks of at most the link's maximum
    /// write length.
    ///
    /// Chunks are separated by `chunk_delay` and followed by
    /// `settle_delay`. A failed write aborts the remaining chunks; the
    /// payload is never resumed. Cancelling `cancel` aborts at the next
    /// inter-chunk delay and leaves the link connected; once the last
    /// chunk is written the payload counts as delivered.
    pub async fn send_with(
        &self,
        data: &[u8],
        mode: WriteMode,
        cancel: &CancellationToken,
    ) -> Result<SendReport, BridgeError> {
        let mut inner = self.inner.lock().await;
        let link = Self::live_link(&mut inner).await?;

        let chunk_size = link.max_write_len().max(1);
        let total = data.len().div_ceil(chunk_size);
        debug!("sending {} bytes as {total} chunk(s) of {chunk_size}", data.len());

        for (idx, chunk) in data.chunks(chunk_size).enumerate() {
            if let Err(e) = link.write(chunk, mode).await {
                let lost = !link.is_connected().await;
                let err = BridgeError::WriteFailed {
                    chunk: idx + 1,
                    total,
                    reason: e.to_string(),
                };
                if lost {
                    warn!("link lost during write");
                    inner.link = None;
                    inner.state.disconnected();
                }
                return Err(err);
            }

            if idx + 1 < total {
                let pause = self.config.chunk_delay;
                if !pause.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = cancel.cancelled() => {
                            debug!("send cancelled after chunk {}/{total}", idx + 1);
                            return Err(BridgeError::Cancelled);
                        }
                    }
                } else if cancel.is_cancelled() {
                    debug!("send cancelled after chunk {}/{total}", idx + 1);
                    return Err(BridgeError::Cancelled);
                }
            } else if !self.config.settle_delay.is_zero() {
                // Every chunk is out; cancelling only shortens the settle.
                tokio::select! {
                    _ = tokio::time::sleep(self.config.settle_delay) => {}
                    _ = cancel.cancelled() => debug!("settle delay cut short"),
                }
            }
        }

        Ok(SendReport {
            bytes: data.len(),
            chunks: total,
            chunk_size,
        })
    }

    /// Read the read characteristic once. `None` when not connected.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, BridgeError> {
        let mut inner = self.inner.lock().await;
        let link = match Self::live_link(&mut inner).await {
            Ok(link) => link,
            Err(BridgeError::NotConnected) => return Ok(None),
            Err(e) => return Err(e),
        };
        let data = link.read().await?;
        debug!("read {} bytes from device", data.len());
        Ok(Some(data))
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn try_resolvers(&self, address: &str) -> Result<Box<dyn GattLink>, BridgeError> {
        let mut last_error = None;
        for resolver in &self.resolvers {
            match resolver.resolve(address).await {
                Ok(Some(link)) => {
                    debug!("{address} resolved via {}", resolver.name());
                    return Ok(link);
                }
                Ok(None) => debug!("{} cannot see {address}", resolver.name()),
                Err(e) => {
                    debug!("{} failed for {address}: {e}", resolver.name());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BridgeError::DeviceNotFound(address.to_string())))
    }

    /// The current link, if it is still up. Marks a dropped link.
    async fn live_link(inner: &mut Inner) -> Result<&dyn GattLink, BridgeError> {
        if !inner.state.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let alive = match inner.link.as_deref() {
            Some(link) => link.is_connected().await,
            None => false,
        };
        if !alive {
            warn!("link to device was lost");
            inner.link = None;
            inner.state.disconnected();
            return Err(BridgeError::NotConnected);
        }
        inner.link.as_deref().ok_or(BridgeError::NotConnected)
    }

    async fn close_link(inner: &mut Inner) {
        if let Some(link) = inner.link.take() {
            if let Err(e) = link.disconnect().await {
                warn!("error while disconnecting: {e}");
            }
            if let Some(address) = &inner.address {
                info!("disconnected from {address}");
            }
        }
        inner.state.disconnected();
    }
}

// ── Tests ────────────────────────────────────────────────────────
