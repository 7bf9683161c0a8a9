//! wledble-gateway — entry point.
//!
//! ```text
//! wledble-gateway                    Run in the foreground
//! wledble-gateway --config <path>    Load a custom config TOML
//! wledble-gateway --gen-config       Write default config to stdout
//! wledble-gateway --scan             List nearby displays and exit
//! wledble-gateway --dry-run          Forward into an in-memory link
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wledble_core::ble::discover;
use wledble_gateway::config::BridgeConfig;
use wledble_gateway::service::BridgeService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "wledble-gateway",
    about = "Forward WLED realtime UDP pixel streams to a BLE LED matrix"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "wledble-gateway.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Scan for displays matching the configured name prefix and exit.
    #[arg(long)]
    scan: bool,

    /// Device address, overriding the configuration.
    #[arg(short, long)]
    address: Option<String>,

    /// UDP port, overriding the configuration.
    #[arg(short, long)]
    port: Option<u16>,

    /// Frame rate ceiling, overriding the configuration (0 = unlimited).
    #[arg(long)]
    max_fps: Option<f64>,

    /// Forward into an in-memory link instead of a BLE device.
    #[arg(long)]
    dry_run: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", BridgeConfig::default_toml()?);
        return Ok(());
    }

    // Load config and apply overrides.
    let mut config = BridgeConfig::load(&cli.config);
    if let Some(address) = cli.address {
        config.device.address = Some(address);
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(max_fps) = cli.max_fps {
        config.gateway.max_fps = max_fps;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // --scan: list devices and exit.
    if cli.scan {
        let devices = discover(&config.device.name_prefix, config.scan_timeout()).await?;
        if devices.is_empty() {
            println!("no {}* devices found", config.device.name_prefix);
        }
        for device in devices {
            println!("{}\t{}", device.address, device.name);
        }
        return Ok(());
    }

    info!("wledble-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("udp: {}:{}", config.gateway.host, config.gateway.port);
    info!("screen: {}", config.screen_size());
    info!("max fps: {}", config.gateway.max_fps);
    match &config.device.address {
        Some(address) => info!("device: {address}"),
        None if cli.dry_run => info!("device: in-memory"),
        None => info!("device: first {}* discovered", config.device.name_prefix),
    }

    let service = if cli.dry_run {
        BridgeService::dry_run(config)
    } else {
        BridgeService::new(config)
    };
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
