//! Integration tests: WLED datagrams over a real UDP socket on
//! localhost, through the gateway, into an in-memory display link.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_test::assert_ok;
use wledble_core::ble::{LinkProbe, MemoryResolver};
use wledble_core::{
    ConnectionConfig, ConnectionManager, Gateway, GatewayOptions, GatewayStats, ScreenSize,
    StartOutcome, WriteMode,
};

// ── Helpers ──────────────────────────────────────────────────────

struct Harness {
    gateway: Gateway,
    probe: Arc<LinkProbe>,
    sender: UdpSocket,
    target: SocketAddr,
}

async fn harness(max_fps: f64) -> Harness {
    harness_with(max_fps, 8, 128).await
}

async fn harness_with(max_fps: f64, queue_capacity: usize, max_write_len: usize) -> Harness {
    let probe = LinkProbe::new();
    let resolver = MemoryResolver::new(Arc::clone(&probe), max_write_len);
    let config = ConnectionConfig {
        connect_attempts: 1,
        retry_backoff: Duration::ZERO,
        chunk_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
        write_mode: WriteMode::WithoutResponse,
    };
    let connection = ConnectionManager::shared(vec![Box::new(resolver)], config);
    connection.bind_address("AA:BB:CC:DD:EE:FF").await;

    let gateway = Gateway::new(
        connection,
        GatewayOptions {
            max_fps,
            queue_capacity,
        },
    );
    let outcome = assert_ok!(gateway.start("127.0.0.1", 0, ScreenSize::S16).await);
    let StartOutcome::Started(target) = outcome else {
        panic!("gateway did not start: {outcome:?}");
    };

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    Harness {
        gateway,
        probe,
        sender,
        target,
    }
}

impl Harness {
    async fn send(&self, datagram: &[u8]) {
        self.sender.send_to(datagram, self.target).await.unwrap();
    }

    async fn wait_for(&self, pred: impl Fn(&GatewayStats) -> bool) -> GatewayStats {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = self.gateway.stats();
                if pred(&stats) {
                    return stats;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match waited {
            Ok(stats) => stats,
            Err(_) => panic!("condition not reached; stats: {:?}", self.gateway.stats()),
        }
    }
}

/// Strip the single-block upload header and decode the PNG.
fn decode_upload(bytes: &[u8]) -> image::RgbImage {
    image::load_from_memory_with_format(&bytes[9..], image::ImageFormat::Png)
        .unwrap()
        .to_rgb8()
}

/// Split the recorded writes into whole single-block uploads.
fn split_uploads(mut bytes: &[u8]) -> Vec<&[u8]> {
    let mut uploads = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= 9, "truncated upload header");
        assert_eq!(bytes[4], 0, "upload does not start with a first block");
        let png_len = u32::from_le_bytes(bytes[5..9].try_into().unwrap()) as usize;
        assert!(bytes.len() >= 9 + png_len, "truncated upload body");
        let (upload, rest) = bytes.split_at(9 + png_len);
        uploads.push(upload);
        bytes = rest;
    }
    uploads
}

// ── Pixel delivery ───────────────────────────────────────────────

#[tokio::test]
async fn drgb_datagram_reaches_display() {
    let h = harness(0.0).await;
    h.send(&[2, 1, 255, 0, 0, 0, 255, 0]).await;

    let stats = h.wait_for(|s| s.frames_sent == 1).await;
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.frames_skipped, 0);

    let upload = h.probe.written_bytes();
    assert!(h.probe.writes().iter().all(|c| c.len() <= 128));
    let img = decode_upload(&upload);
    assert_eq!(img.dimensions(), (16, 16));
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0]);
    assert_eq!(img.get_pixel(2, 0).0, [0, 0, 0]);

    h.gateway.stop().await;
}

#[tokio::test]
async fn dnrgb_writes_at_offset() {
    let h = harness(0.0).await;
    // Start index 17 = row 1, column 1 on a 16x16 display.
    h.send(&[4, 1, 0, 17, 1, 2, 3]).await;

    h.wait_for(|s| s.frames_sent == 1).await;
    let img = decode_upload(&h.probe.written_bytes());
    assert_eq!(img.get_pixel(1, 1).0, [1, 2, 3]);
    assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);

    h.gateway.stop().await;
}

#[tokio::test]
async fn identical_frames_are_skipped() {
    let h = harness(0.0).await;
    let datagram = [2, 1, 10, 20, 30];

    h.send(&datagram).await;
    h.wait_for(|s| s.frames_sent == 1).await;
    let writes = h.probe.write_count();

    h.send(&datagram).await;
    let stats = h.wait_for(|s| s.frames_skipped == 1).await;
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(h.probe.write_count(), writes);

    h.gateway.stop().await;
}

#[tokio::test]
async fn invalid_datagrams_are_counted_but_ignored() {
    let h = harness(0.0).await;
    h.send(&[9, 1, 1, 2, 3]).await;
    h.send(&[2]).await;
    h.send(&[4, 1, 0]).await;

    let stats = h.wait_for(|s| s.frames_received == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(h.probe.write_count(), 0);

    h.gateway.stop().await;
}

#[tokio::test]
async fn rate_limit_applies_at_runtime() {
    let h = harness(0.0).await;
    h.gateway.set_max_fps(1.0);

    h.send(&[2, 1, 1, 1, 1]).await;
    h.wait_for(|s| s.frames_sent == 1).await;
    h.send(&[2, 1, 2, 2, 2]).await;
    let stats = h.wait_for(|s| s.frames_skipped == 1).await;
    assert_eq!(stats.frames_sent, 1);

    h.gateway.stop().await;
}

// ── Backpressure ─────────────────────────────────────────────────

#[tokio::test]
async fn slow_link_drops_newest_and_keeps_uploads_whole() {
    let h = harness_with(0.0, 1, 16).await;
    h.probe.set_write_latency(Duration::from_millis(5));

    for i in 0..20u8 {
        h.send(&[2, 1, i + 1, 0, 0]).await;
    }
    h.send(&[9, 1, 1, 2, 3]).await;
    h.send(&[2]).await;

    let stats = h
        .wait_for(|s| s.frames_received == 22 && s.frames_sent + s.frames_skipped == 20)
        .await;
    assert!(stats.frames_skipped > 0, "queue never overflowed: {stats:?}");
    assert_eq!(stats.frames_failed, 0);
    assert_eq!(
        stats.frames_received,
        stats.frames_sent + stats.frames_skipped + 2
    );

    assert!(h.probe.writes().iter().all(|c| c.len() <= 16));
    let bytes = h.probe.written_bytes();
    let uploads = split_uploads(&bytes);
    assert_eq!(uploads.len() as u64, stats.frames_sent);

    // Updates are applied in arrival order, so each upload is brighter.
    let reds: Vec<u8> = uploads
        .iter()
        .map(|upload| decode_upload(upload).get_pixel(0, 0).0[0])
        .collect();
    assert!(reds.windows(2).all(|w| w[0] < w[1]), "out of order: {reds:?}");
    assert_eq!(reds.first(), Some(&1));

    h.gateway.stop().await;
}

// ── Failure handling ─────────────────────────────────────────────

#[tokio::test]
async fn write_failure_does_not_stop_the_worker() {
    let h = harness(0.0).await;
    h.probe.fail_write_at(0);

    h.send(&[2, 1, 255, 255, 255]).await;
    let stats = h.wait_for(|s| s.frames_failed == 1).await;
    assert_eq!(stats.frames_sent, 0);
    assert!(h.gateway.is_running());

    // Same content is eligible again after the failure.
    h.send(&[2, 1, 255, 255, 255]).await;
    let stats = h.wait_for(|s| s.frames_sent == 1).await;
    assert_eq!(stats.frames_failed, 1);

    h.gateway.stop().await;
}

#[tokio::test]
async fn missing_device_is_reported_per_frame() {
    let probe = LinkProbe::new();
    let resolver = MemoryResolver::new(Arc::clone(&probe), 128);
    resolver.set_visible(false);
    let config = ConnectionConfig {
        connect_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        ..ConnectionConfig::default()
    };
    let connection = ConnectionManager::shared(vec![Box::new(resolver)], config);
    connection.bind_address("AA:BB:CC:DD:EE:FF").await;

    let gateway = Gateway::new(Arc::clone(&connection), GatewayOptions::default());
    let StartOutcome::Started(target) =
        assert_ok!(gateway.start("127.0.0.1", 0, ScreenSize::S32).await)
    else {
        panic!("gateway did not start");
    };

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(&[2, 1, 9, 9, 9], target).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while gateway.stats().frames_failed == 0 {
        assert!(tokio::time::Instant::now() < deadline, "frame never failed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gateway.is_running());
    assert!(!connection.is_connected().await);

    gateway.stop().await;
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn start_twice_reports_already_running() {
    let h = harness(0.0).await;
    let again = assert_ok!(h.gateway.start("127.0.0.1", 0, ScreenSize::S16).await);
    assert_eq!(again, StartOutcome::AlreadyRunning);
    assert_eq!(h.gateway.local_addr().await, Some(h.target));

    h.gateway.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_restart_resets_counters() {
    let h = harness(0.0).await;
    h.send(&[2, 1, 1, 2, 3]).await;
    h.wait_for(|s| s.frames_sent == 1).await;

    h.gateway.stop().await;
    assert!(!h.gateway.is_running());
    assert!(!h.gateway.stats().running);
    assert_eq!(h.gateway.local_addr().await, None);
    h.gateway.stop().await;

    let restarted = assert_ok!(h.gateway.start("127.0.0.1", 0, ScreenSize::S16).await);
    assert!(matches!(restarted, StartOutcome::Started(_)));
    let stats = h.gateway.stats();
    assert!(stats.running);
    assert_eq!(stats.frames_received, 0);
    assert_eq!(stats.frames_sent, 0);

    h.gateway.stop().await;
}

#[tokio::test]
async fn start_during_stop_waits_for_the_stop() {
    let h = harness(0.0).await;
    h.probe.set_write_latency(Duration::from_millis(400));
    h.send(&[2, 1, 1, 2, 3]).await;
    h.wait_for(|s| s.frames_received == 1).await;
    // Let the worker get into the slow write.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, restarted) = tokio::join!(h.gateway.stop(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.gateway.start("127.0.0.1", 0, ScreenSize::S16).await
    });
    let restarted = assert_ok!(restarted);
    assert!(matches!(restarted, StartOutcome::Started(_)));
    assert!(h.gateway.is_running());
    assert!(h.gateway.stats().running);
    assert!(h.gateway.local_addr().await.is_some());

    h.gateway.stop().await;
}

#[tokio::test]
async fn bind_failure_is_an_error() {
    let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let connection = ConnectionManager::shared(Vec::new(), ConnectionConfig::default());
    let gateway = Gateway::new(connection, GatewayOptions::default());
    assert!(gateway.start("127.0.0.1", port, ScreenSize::S32).await.is_err());
    assert!(!gateway.is_running());
}

#[tokio::test]
async fn stats_serialise_to_json() {
    let h = harness(0.0).await;
    h.send(&[2, 1, 5, 5, 5]).await;
    let stats = h.wait_for(|s| s.frames_sent == 1).await;

    let json: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
    assert_eq!(json["running"], true);
    assert_eq!(json["port"], h.target.port());
    assert_eq!(json["frames_received"], 1);
    assert_eq!(json["frames_sent"], 1);

    h.gateway.stop().await;
}
