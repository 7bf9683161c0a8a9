//! In-memory GATT link.
//!
//! Records every chunk written and can simulate a dropped link or a
//! failing write. Used for dry runs without hardware and in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::ble::link::{GattLink, WriteMode};
use crate::ble::resolver::LinkResolver;
use crate::error::BridgeError;

// ── LinkProbe ────────────────────────────────────────────────────

/// Shared view of what happened on a [`MemoryLink`].
#[derive(Debug, Default)]
pub struct LinkProbe {
    writes: Mutex<Vec<Vec<u8>>>,
    connected: AtomicBool,
    fail_at_write: Mutex<Option<usize>>,
    disconnects: AtomicUsize,
    read_value: Mutex<Vec<u8>>,
    write_latency: Mutex<Duration>,
}

impl LinkProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All chunks written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Concatenation of every chunk written so far.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes().concat()
    }

    /// Make the write with zero-based index `n` (counted over the
    /// lifetime of the probe) fail.
    pub fn fail_write_at(&self, n: usize) {
        if let Ok(mut f) = self.fail_at_write.lock() {
            *f = Some(n);
        }
    }

    /// Simulate the device dropping the link.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_read_value(&self, value: Vec<u8>) {
        if let Ok(mut v) = self.read_value.lock() {
            *v = value;
        }
    }

    /// Delay every write by `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.write_latency.lock() {
            *l = latency;
        }
    }

    fn latency(&self) -> Duration {
        self.write_latency.lock().map(|l| *l).unwrap_or_default()
    }
}

// ── MemoryLink ───────────────────────────────────────────────────

pub struct MemoryLink {
    probe: Arc<LinkProbe>,
    max_write_len: usize,
}

impl MemoryLink {
    pub fn new(probe: Arc<LinkProbe>, max_write_len: usize) -> Self {
        probe.connected.store(true, Ordering::SeqCst);
        Self {
            probe,
            max_write_len: max_write_len.max(1),
        }
    }
}

#[async_trait]
impl GattLink for MemoryLink {
    fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    async fn is_connected(&self) -> bool {
        self.probe.is_connected()
    }

    async fn write(&self, chunk: &[u8], _mode: WriteMode) -> Result<(), BridgeError> {
        let latency = self.probe.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.probe.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let mut writes = self
            .probe
            .writes
            .lock()
            .map_err(|_| BridgeError::Other("write log poisoned".into()))?;
        let fail_at = self.probe.fail_at_write.lock().map(|f| *f).unwrap_or(None);
        if fail_at == Some(writes.len()) {
            return Err(BridgeError::Other("simulated write failure".into()));
        }
        writes.push(chunk.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, BridgeError> {
        Ok(self
            .probe
            .read_value
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.probe.connected.store(false, Ordering::SeqCst);
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── MemoryResolver ───────────────────────────────────────────────

/// Resolver handing out [`MemoryLink`]s bound to one probe.
pub struct MemoryResolver {
    probe: Arc<LinkProbe>,
    max_write_len: usize,
    failures_left: AtomicUsize,
    resolves: AtomicUsize,
    visible: AtomicBool,
}

impl MemoryResolver {
    pub fn new(probe: Arc<LinkProbe>, max_write_len: usize) -> Self {
        Self {
            probe,
            max_write_len,
            failures_left: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
            visible: AtomicBool::new(true),
        }
    }

    /// Fail the next `n` resolve attempts with an error.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Whether the device can be found at all.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Number of resolve calls so far.
    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkResolver for MemoryResolver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn resolve(&self, _address: &str) -> Result<Option<Box<dyn GattLink>>, BridgeError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BridgeError::Other("simulated connect failure".into()));
        }
        if !self.visible.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLink::new(
            Arc::clone(&self.probe),
            self.max_write_len,
        ))))
    }
}
