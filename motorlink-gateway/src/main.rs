//! motorlink: serial motor gateway with an HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use motorlink_common::LoggingConfig;
use motorlink_gateway::Gateway;
use motorlink_gateway::config::GatewayConfig;
use motorlink_gateway::http;
use motorlink_gateway::sensor::SensorClient;

/// Gateway for serial motor controllers and a Modbus tilt sensor.
#[derive(Parser, Debug)]
#[command(name = "motorlink")]
#[command(about = "Send opcodes to serial motor controllers and collect their status")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "motorlink.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway and its HTTP surface (default)
    Serve,
    /// Print tilt sensor angles periodically
    Tilt {
        /// Delay between reads in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    motorlink_common::init_tracing(&log_config).context("Failed to init tracing")?;

    info!("Loaded configuration from {:?}", args.config);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Tilt { interval_ms } => tilt(config, Duration::from_millis(interval_ms)).await,
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    info!("Starting motorlink {}", env!("CARGO_PKG_VERSION"));

    let listen_addr = config.listen_addr()?;
    let gateway = Arc::new(
        Gateway::start(&config)
            .await
            .context("Failed to start gateway")?,
    );

    if gateway.device_ids().is_empty() {
        warn!("No motor channels opened");
    }

    let result = http::serve(gateway.clone(), listen_addr, wait_for_shutdown()).await;
    if let Err(e) = &result {
        error!("HTTP server error: {:#}", e);
    }

    let stats = gateway.poller_stats();
    info!(
        scans = stats.scans,
        events = stats.events,
        errors = stats.errors,
        "Final statistics"
    );

    result
}

async fn tilt(config: GatewayConfig, interval: Duration) -> Result<()> {
    let sensor_config = config
        .sensor
        .as_ref()
        .context("No sensor configured")?;

    let mut sensor = SensorClient::connect(sensor_config)
        .await
        .context("Failed to connect to tilt sensor")?;

    let mut ticker = tokio::time::interval(interval);
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sensor.read_angles().await {
                    Some(reading) => println!("{}", reading),
                    None => println!("No data"),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    sensor.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await
}
