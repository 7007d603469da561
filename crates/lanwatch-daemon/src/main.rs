//! Lanwatch Daemon - Main entry point
//!
//! Runs periodic discovery of the local network and keeps the device list
//! identified in the background.

mod config;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// How long `--scan-once` waits for identity lookups before printing
const SCAN_ONCE_RESOLUTION_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "lanwatch")]
#[command(about = "Local network device discovery and identification daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lanwatch.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan, wait for identification and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Lanwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config)?;

    info!(
        interval_secs = config.discovery.interval_secs,
        grace_period = config.discovery.grace_period,
        workers = config.resolution.workers,
        "Configuration loaded"
    );

    let state = state::AppState::new(config).await?;

    if args.scan_once {
        info!("Running single discovery scan");
        let report = state.scanner.scan_once().await?;
        if !state.scanner.wait_for_resolution(SCAN_ONCE_RESOLUTION_WAIT).await {
            warn!("Identification still running, printing partial results");
        }
        state.scanner.shutdown().await;

        let devices = state.scanner.devices().await;
        println!(
            "Observed {} devices ({} new), {} known:",
            report.observed,
            report.new_devices,
            devices.len()
        );
        for device in devices {
            println!(
                "  {:<8} {:<32} {:<16} {}",
                if device.online { "online" } else { "offline" },
                device.display_name(),
                device.ip,
                device.mac
            );
            println!(
                "           type: {}  vendor: {}",
                device.device_type,
                device.vendor.as_deref().unwrap_or("-")
            );
        }
        state.save_devices().await?;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let runner = {
        let scanner = state.scanner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scanner.run(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    if let Err(e) = runner.await {
        warn!(error = %e, "Discovery loop ended abnormally");
    }
    state.scanner.shutdown().await;
    state.save_devices().await?;

    Ok(())
}
