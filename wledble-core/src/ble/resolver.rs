//! Transport resolution strategies and device discovery.
//!
//! A [`LinkResolver`] turns a device address into a live [`GattLink`].
//! Two strategies exist:
//!
//! - [`SharedAdapterResolver`]: looks the device up on an adapter the
//!   host already owns and keeps scanning (shared stack or BLE proxy).
//!   It never starts a scan of its own.
//! - [`LocalAdapterResolver`]: opens the first local adapter and scans
//!   for the address until a deadline.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use serde::Serialize;
use tracing::{debug, info};

use crate::ble::link::{BtleLink, GattLink, GattProfile};
use crate::error::BridgeError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ── LinkResolver ─────────────────────────────────────────────────

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Open a link to `address`.
    ///
    /// `Ok(None)` means this strategy cannot see the device; the next
    /// strategy should be tried.
    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn GattLink>>, BridgeError>;
}

#[async_trait]
impl<T: LinkResolver + ?Sized> LinkResolver for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn GattLink>>, BridgeError> {
        (**self).resolve(address).await
    }
}

// ── SharedAdapterResolver ────────────────────────────────────────

/// Resolves through an adapter owned and scanned by the host.
pub struct SharedAdapterResolver {
    adapter: Adapter,
    profile: GattProfile,
}

impl SharedAdapterResolver {
    pub fn new(adapter: Adapter, profile: GattProfile) -> Self {
        Self { adapter, profile }
    }

    /// Start a background scan on the shared adapter so devices become
    /// known to it. The scan keeps running until the adapter is dropped.
    pub async fn start_scanning(&self) -> Result<(), BridgeError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        debug!("background scan started on shared adapter");
        Ok(())
    }
}

#[async_trait]
impl LinkResolver for SharedAdapterResolver {
    fn name(&self) -> &'static str {
        "shared-adapter"
    }

    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn GattLink>>, BridgeError> {
        let Some(peripheral) = find_known(&self.adapter, address).await? else {
            debug!("{address} not known to the shared adapter");
            return Ok(None);
        };
        let link = BtleLink::open(peripheral, &self.profile).await?;
        Ok(Some(Box::new(link)))
    }
}

// ── LocalAdapterResolver ─────────────────────────────────────────

/// Resolves by scanning on the first local adapter.
pub struct LocalAdapterResolver {
    profile: GattProfile,
    scan_timeout: Duration,
}

impl LocalAdapterResolver {
    pub fn new(profile: GattProfile, scan_timeout: Duration) -> Self {
        Self {
            profile,
            scan_timeout,
        }
    }
}

#[async_trait]
impl LinkResolver for LocalAdapterResolver {
    fn name(&self) -> &'static str {
        "local-adapter"
    }

    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn GattLink>>, BridgeError> {
        let adapter = first_adapter().await?;

        let peripheral = match find_known(&adapter, address).await? {
            Some(p) => Some(p),
            None => scan_for(&adapter, address, self.scan_timeout).await?,
        };
        let Some(peripheral) = peripheral else {
            return Ok(None);
        };

        let link = BtleLink::open(peripheral, &self.profile).await?;
        Ok(Some(Box::new(link)))
    }
}

// ── Discovery ────────────────────────────────────────────────────

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
}

/// Scan the first local adapter for `timeout` and return advertisers
/// whose local name starts with `name_prefix`.
pub async fn discover(
    name_prefix: &str,
    timeout: Duration,
) -> Result<Vec<DiscoveredDevice>, BridgeError> {
    info!("scanning for {name_prefix}* devices for {timeout:?}");
    let adapter = first_adapter().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;
    let peripherals = adapter.peripherals().await;
    adapter.stop_scan().await?;

    let mut found = Vec::new();
    for peripheral in peripherals? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let Some(name) = props.local_name else {
            continue;
        };
        if name.starts_with(name_prefix) {
            let address = peripheral.address().to_string();
            info!("found device {address} with name {name}");
            found.push(DiscoveredDevice { address, name });
        }
    }
    Ok(found)
}

/// The first Bluetooth adapter of the local host.
pub async fn first_adapter() -> Result<Adapter, BridgeError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(BridgeError::NoAdapter)
}

// ── Internal ─────────────────────────────────────────────────────

async fn find_known(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>, BridgeError> {
    for peripheral in adapter.peripherals().await? {
        if matches_address(&peripheral, address) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

async fn scan_for(
    adapter: &Adapter,
    address: &str,
    timeout: Duration,
) -> Result<Option<Peripheral>, BridgeError> {
    debug!("scanning for {address}");
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut found = None;
    while tokio::time::Instant::now() < deadline {
        if let Some(p) = find_known(adapter, address).await? {
            found = Some(p);
            break;
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }

    adapter.stop_scan().await?;
    Ok(found)
}

/// Matches a MAC address or, where the platform hides MACs, the
/// peripheral id.
fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    addresses_equal(&peripheral.address().to_string(), address)
        || addresses_equal(&peripheral.id().to_string(), address)
}

fn addresses_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b.trim())
}
