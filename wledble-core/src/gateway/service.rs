//! UDP-to-display gateway.
//!
//! Two tasks run while the gateway is started:
//!
//! 1. The **listener** receives WLED datagrams, parses them and queues
//!    owned [`PixelUpdate`]s. When the queue is full the newest update
//!    is dropped and counted as skipped.
//! 2. The **worker** applies updates to the [`PixelBuffer`] in arrival
//!    order, asks the [`FrameScheduler`] whether to transmit, encodes
//!    accepted frames and hands them to the [`ConnectionManager`].
//!
//! Transmission errors are logged and counted; they never stop either
//! task. Both tasks share one `CancellationToken` that [`Gateway::stop`]
//! triggers, which also aborts an in-flight chunked write at its next
//! pacing delay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ble::manager::{ConnectionManager, SendReport};
use crate::error::BridgeError;
use crate::frame::buffer::PixelBuffer;
use crate::frame::encoder::{ImageUploadEnvelope, PayloadEnvelope, StillImageEncoder};
use crate::frame::scheduler::{DEFAULT_MAX_FPS, FrameDecision, FrameScheduler, RateLimit};
use crate::frame::types::ScreenSize;
use crate::gateway::stats::{GatewayStats, StatsCounters};
use crate::wled::{self, PixelUpdate};

/// Largest UDP payload we accept.
const MAX_DATAGRAM: usize = 65_535;

/// Pause after a failed receive before polling the socket again.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

// ── GatewayOptions ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Initial frame rate ceiling; `<= 0` means unlimited.
    pub max_fps: f64,
    /// Pending updates between listener and worker (at least 1).
    pub queue_capacity: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_fps: DEFAULT_MAX_FPS,
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Listening on the contained address.
    Started(SocketAddr),
    /// `start` was called while already running; nothing changed.
    AlreadyRunning,
}

// ── Gateway ──────────────────────────────────────────────────────

struct Running {
    cancel: CancellationToken,
    listener: JoinHandle<()>,
    worker: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct Gateway {
    connection: Arc<ConnectionManager>,
    envelope: Arc<dyn PayloadEnvelope>,
    rate: Arc<RateLimit>,
    stats: Arc<StatsCounters>,
    queue_capacity: usize,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    pub fn new(connection: Arc<ConnectionManager>, options: GatewayOptions) -> Self {
        Self::with_envelope(connection, options, Arc::new(ImageUploadEnvelope))
    }

    /// Use a custom device command envelope.
    pub fn with_envelope(
        connection: Arc<ConnectionManager>,
        options: GatewayOptions,
        envelope: Arc<dyn PayloadEnvelope>,
    ) -> Self {
        Self {
            connection,
            envelope,
            rate: Arc::new(RateLimit::new(options.max_fps)),
            stats: Arc::new(StatsCounters::new()),
            queue_capacity: options.queue_capacity.max(1),
            running: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Bind `host:port` and start the listener and worker.
    ///
    /// Counters are reset and the pixel buffer starts black at
    /// `screen_size`. A bind failure is returned and leaves the gateway
    /// stopped.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        screen_size: ScreenSize,
    ) -> Result<StartOutcome, BridgeError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("gateway is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let socket = match UdpSocket::bind((host, port)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("failed to bind udp {host}:{port}: {e}");
                return Err(e.into());
            }
        };
        let local_addr = socket.local_addr()?;

        self.stats.reset(local_addr.port());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let listener = tokio::spawn(listen(
            socket,
            tx,
            Arc::clone(&self.stats),
            cancel.clone(),
        ));

        let pipeline = FramePipeline {
            buffer: PixelBuffer::new(screen_size),
            scheduler: FrameScheduler::new(Arc::clone(&self.rate)),
            encoder: StillImageEncoder::new(Arc::clone(&self.envelope)),
            connection: Arc::clone(&self.connection),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(pipeline.run(rx));

        info!("gateway listening on udp {local_addr} for a {screen_size} display");
        *running = Some(Running {
            cancel,
            listener,
            worker,
            local_addr,
        });
        Ok(StartOutcome::Started(local_addr))
    }

    /// Stop both tasks and wait for them to finish. Idempotent.
    ///
    /// The lifecycle lock is held until both tasks have ended, so a
    /// concurrent [`start`](Self::start) waits for the stop to complete.
    /// The BLE link is left as it is; call
    /// [`ConnectionManager::disconnect`] to close it.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            debug!("gateway is not running");
            return;
        };

        run.cancel.cancel();
        if let Err(e) = run.listener.await {
            warn!("udp listener ended abnormally: {e}");
        }
        if let Err(e) = run.worker.await {
            warn!("frame worker ended abnormally: {e}");
        }
        self.stats.set_running(false);
        info!("gateway on {} stopped", run.local_addr);
    }

    /// Change the frame rate ceiling. Takes effect on the next frame.
    pub fn set_max_fps(&self, max_fps: f64) {
        self.rate.set_max_fps(max_fps);
        debug!("max fps set to {max_fps}");
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }

    /// Bound UDP address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut() {
            run.cancel.cancel();
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────

async fn listen(
    socket: UdpSocket,
    queue: mpsc::Sender<PixelUpdate>,
    stats: Arc<StatsCounters>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };
        let (len, peer) = match received {
            Ok(pair) => pair,
            Err(e) => {
                warn!("udp receive error: {e}");
                if !pause_after_error(&cancel).await {
                    break;
                }
                continue;
            }
        };

        stats.record_received();
        let Some(packet) = wled::parse(&buf[..len]) else {
            trace!("ignored {len}-byte datagram from {peer}");
            continue;
        };

        match queue.try_send(packet.to_update()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.record_skipped();
                debug!("frame queue full; dropped update from {peer}");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    debug!("udp listener stopped");
}

/// Wait out [`RECV_RETRY_DELAY`]. `false` if cancelled meanwhile.
async fn pause_after_error(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(RECV_RETRY_DELAY) => true,
    }
}

// ── Worker ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Sent,
    Skipped(FrameDecision),
    Failed,
    Cancelled,
}

struct FramePipeline {
    buffer: PixelBuffer,
    scheduler: FrameScheduler,
    encoder: StillImageEncoder,
    connection: Arc<ConnectionManager>,
    stats: Arc<StatsCounters>,
    cancel: CancellationToken,
}

impl FramePipeline {
    async fn run(mut self, mut queue: mpsc::Receiver<PixelUpdate>) {
        loop {
            let update = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                update = queue.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };
            self.process(&update).await;
        }
        debug!("frame worker stopped");
    }

    async fn process(&mut self, update: &PixelUpdate) -> FrameOutcome {
        self.buffer.apply_update(update);

        let decision = self.scheduler.evaluate(&self.buffer);
        if !decision.is_send() {
            self.stats.record_skipped();
            trace!("frame skipped: {decision:?}");
            return FrameOutcome::Skipped(decision);
        }
        self.stats.set_fps(self.scheduler.fps());

        match self.transmit().await {
            Ok(report) => {
                self.stats.record_sent();
                trace!(
                    "frame sent: {} bytes in {} chunk(s)",
                    report.bytes, report.chunks
                );
                FrameOutcome::Sent
            }
            Err(BridgeError::Cancelled) => {
                self.scheduler.forget_last_frame();
                FrameOutcome::Cancelled
            }
            Err(e) => {
                if e.is_connect_failure() {
                    warn!("display unreachable; frame dropped: {e}");
                } else {
                    warn!("frame not delivered: {e}");
                }
                self.stats.record_failed();
                self.scheduler.forget_last_frame();
                FrameOutcome::Failed
            }
        }
    }

    async fn transmit(&mut self) -> Result<SendReport, BridgeError> {
        let frame = self.encoder.encode(&self.buffer)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
            connected = self.connection.connect() => connected?,
        }

        let mode = self.connection.config().write_mode;
        self.connection
            .send_with(&frame.data, mode, &self.cancel)
            .await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link::WriteMode;
    use crate::ble::manager::ConnectionConfig;
    use crate::ble::memory::{LinkProbe, MemoryResolver};
    use crate::frame::types::Rgb;
    use crate::wled::Protocol;

    fn quick_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_attempts: 1,
            retry_backoff: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            write_mode: WriteMode::WithoutResponse,
        }
    }

    async fn pipeline(max_fps: f64) -> (FramePipeline, Arc<LinkProbe>, Arc<MemoryResolver>) {
        let probe = LinkProbe::new();
        let resolver = Arc::new(MemoryResolver::new(Arc::clone(&probe), 64));
        let connection = ConnectionManager::shared(vec![Box::new(Arc::clone(&resolver))], quick_config());
        connection.bind_address("AA:BB:CC:DD:EE:FF").await;

        let pipeline = FramePipeline {
            buffer: PixelBuffer::new(ScreenSize::S16),
            scheduler: FrameScheduler::new(Arc::new(RateLimit::new(max_fps))),
            encoder: StillImageEncoder::default(),
            connection,
            stats: Arc::new(StatsCounters::new()),
            cancel: CancellationToken::new(),
        };
        (pipeline, probe, resolver)
    }

    fn red_at(start: usize) -> PixelUpdate {
        PixelUpdate {
            protocol: Protocol::Dnrgb,
            start,
            colors: vec![Rgb::new(255, 0, 0)],
        }
    }

    #[tokio::test]
    async fn accepted_frame_reaches_the_link() {
        let (mut p, probe, _) = pipeline(0.0).await;
        assert_eq!(p.process(&red_at(0)).await, FrameOutcome::Sent);

        let bytes = probe.written_bytes();
        assert!(!bytes.is_empty());
        assert!(probe.writes().iter().all(|c| c.len() <= 64));
        // Envelope header, then PNG signature.
        assert_eq!(&bytes[9..13], &[0x89, b'P', b'N', b'G']);
        assert_eq!(p.stats.snapshot().frames_sent, 1);
    }

    #[tokio::test]
    async fn identical_content_is_not_resent() {
        let (mut p, probe, _) = pipeline(0.0).await;
        p.process(&red_at(0)).await;
        let writes = probe.write_count();

        assert_eq!(
            p.process(&red_at(0)).await,
            FrameOutcome::Skipped(FrameDecision::Unchanged)
        );
        assert_eq!(probe.write_count(), writes);
        assert_eq!(p.stats.snapshot().frames_skipped, 1);
    }

    #[tokio::test]
    async fn rate_limit_skips_fast_updates() {
        let (mut p, _, _) = pipeline(1.0).await;
        assert_eq!(p.process(&red_at(0)).await, FrameOutcome::Sent);
        assert_eq!(
            p.process(&red_at(1)).await,
            FrameOutcome::Skipped(FrameDecision::RateLimited)
        );
    }

    #[tokio::test]
    async fn failed_frame_is_retried_with_next_update() {
        let (mut p, probe, resolver) = pipeline(0.0).await;
        resolver.fail_next(1);

        assert_eq!(p.process(&red_at(0)).await, FrameOutcome::Failed);
        assert_eq!(probe.write_count(), 0);

        // Same content becomes eligible again after the failure.
        assert_eq!(p.process(&red_at(0)).await, FrameOutcome::Sent);
        let stats = p.stats.snapshot();
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.frames_skipped, 1);
        assert_eq!(stats.frames_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_errors_back_off_until_cancelled() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(pause_after_error(&cancel).await);
        assert!(started.elapsed() >= RECV_RETRY_DELAY);

        cancel.cancel();
        let started = tokio::time::Instant::now();
        assert!(!pause_after_error(&cancel).await);
        assert!(started.elapsed() < RECV_RETRY_DELAY);
    }

    #[tokio::test]
    async fn cancelled_pipeline_does_not_send() {
        let (mut p, probe, _) = pipeline(0.0).await;
        p.cancel.cancel();
        assert_eq!(p.process(&red_at(0)).await, FrameOutcome::Cancelled);
        assert_eq!(probe.write_count(), 0);
        assert_eq!(p.stats.snapshot().frames_failed, 0);
    }
}
