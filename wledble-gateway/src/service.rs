//! Gateway service core logic.
//!
//! Wires the configured transport into a [`ConnectionManager`], picks
//! the target device, runs the [`Gateway`] until stopped and tears the
//! BLE link down on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, Interval};
use tracing::{error, info, warn};

use wledble_core::ble::{
    LinkProbe, LinkResolver, LocalAdapterResolver, MemoryResolver, SharedAdapterResolver,
    discover, first_adapter,
};
use wledble_core::{BridgeError, ConnectionManager, Gateway, StartOutcome};

use crate::config::BridgeConfig;

/// Address bound in dry-run mode when none is configured.
const DRY_RUN_ADDRESS: &str = "00:00:00:00:00:00";

// ── BridgeService ────────────────────────────────────────────────

/// The top-level gateway service.
pub struct BridgeService {
    config: BridgeConfig,
    running: Arc<AtomicBool>,
    /// Present in dry-run mode; records what would reach the display.
    probe: Option<Arc<LinkProbe>>,
}

impl BridgeService {
    /// Create a service talking to a real BLE display.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            probe: None,
        }
    }

    /// Create a service whose display is an in-memory link.
    pub fn dry_run(config: BridgeConfig) -> Self {
        Self {
            probe: Some(LinkProbe::new()),
            ..Self::new(config)
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn probe(&self) -> Option<&Arc<LinkProbe>> {
        self.probe.as_ref()
    }

    /// Run the service until stopped.
    ///
    /// 1. Builds the connection manager and binds the device address
    ///    (configured, or the first device discovered).
    /// 2. Starts the gateway on the configured UDP address.
    /// 3. Logs stats periodically while running.
    /// 4. On stop, stops the gateway and disconnects the display.
    pub async fn run(&self) -> Result<(), BridgeError> {
        self.running.store(true, Ordering::SeqCst);

        let connection = ConnectionManager::shared(
            self.build_resolvers().await,
            self.config.to_connection_config(),
        );
        let address = match self.resolve_address().await {
            Ok(address) => address,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        connection.bind_address(address).await;

        let gateway = Gateway::new(Arc::clone(&connection), self.config.to_gateway_options());
        let screen_size = self.config.screen_size();
        let outcome = gateway
            .start(&self.config.gateway.host, self.config.gateway.port, screen_size)
            .await;
        match outcome {
            Ok(StartOutcome::Started(addr)) => info!("forwarding WLED on {addr} to the display"),
            Ok(StartOutcome::AlreadyRunning) => {}
            Err(e) => {
                error!("gateway failed to start: {e}");
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let mut ticker = self
            .config
            .stats_interval()
            .map(|every| tokio::time::interval_at(Instant::now() + every, every));

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = Self::wait_for_stop(&self.running) => break,
                _ = Self::tick(&mut ticker) => {
                    info!("stats {}", gateway.stats().to_json());
                }
            }
        }

        gateway.stop().await;
        connection.disconnect().await;
        if let Some(probe) = &self.probe {
            info!("dry run wrote {} bytes", probe.written_bytes().len());
        }
        info!("final stats {}", gateway.stats().to_json());

        self.running.store(false, Ordering::SeqCst);
        info!("gateway service stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Preferred path first: a shared, continuously scanning adapter,
    /// then a scan on the local adapter per connect attempt.
    async fn build_resolvers(&self) -> Vec<Box<dyn LinkResolver>> {
        if let Some(probe) = &self.probe {
            let resolver = MemoryResolver::new(Arc::clone(probe), self.config.device.max_write_len);
            return vec![Box::new(resolver)];
        }

        let profile = self.config.to_profile();
        let mut resolvers: Vec<Box<dyn LinkResolver>> = Vec::new();
        match first_adapter().await {
            Ok(adapter) => {
                let shared = SharedAdapterResolver::new(adapter, profile.clone());
                if let Err(e) = shared.start_scanning().await {
                    warn!("shared adapter scan failed: {e}");
                }
                resolvers.push(Box::new(shared));
            }
            Err(e) => warn!("no shared adapter: {e}"),
        }
        resolvers.push(Box::new(LocalAdapterResolver::new(
            profile,
            self.config.scan_timeout(),
        )));
        resolvers
    }

    /// The configured address, or the first device advertising the
    /// configured name prefix.
    async fn resolve_address(&self) -> Result<String, BridgeError> {
        if let Some(address) = &self.config.device.address {
            return Ok(address.clone());
        }
        if self.probe.is_some() {
            return Ok(DRY_RUN_ADDRESS.to_string());
        }

        let prefix = &self.config.device.name_prefix;
        info!("no device address configured; discovering {prefix}* devices");
        let found = discover(prefix, self.config.scan_timeout()).await?;
        match found.into_iter().next() {
            Some(device) => {
                info!("using {} ({})", device.address, device.name);
                Ok(device.address)
            }
            None => Err(BridgeError::DeviceNotFound(format!("{prefix}*"))),
        }
    }

    async fn tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn local_config() -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.gateway.host = "127.0.0.1".into();
        cfg.gateway.port = 0;
        cfg.gateway.stats_interval_secs = 0;
        cfg
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = BridgeService::new(BridgeConfig::default());
        assert!(!svc.is_running());
        assert!(svc.probe().is_none());
    }

    #[test]
    fn stop_handle_works() {
        let svc = BridgeService::new(BridgeConfig::default());
        let handle = svc.stop_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn configured_address_wins() {
        let mut cfg = local_config();
        cfg.device.address = Some("AA:BB:CC:DD:EE:FF".into());
        let svc = BridgeService::dry_run(cfg);
        assert_eq!(svc.resolve_address().await.unwrap(), "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn dry_run_starts_and_stops() {
        let svc = Arc::new(BridgeService::dry_run(local_config()));
        let task = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.run().await }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !svc.is_running() {
            assert!(Instant::now() < deadline, "service never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        svc.stop();
        assert!(task.await.unwrap().is_ok());
        assert!(!svc.is_running());
    }
}
