//! SmartFan - power and heart rate driven fan control
//!
//! Main entry point for the service.

use clap::Parser;
use smartfan::app::FanService;
use smartfan::config::load_settings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "smartfan", version, about = "Drive a BLE fan from cycling power and heart rate")]
struct Cli {
    /// Settings document (created with defaults if missing)
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,

    /// Log fan commands instead of connecting to the fan
    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,btleplug=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting SmartFan v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = load_settings(&cli.config);
    if cli.test_mode {
        settings.ble.skip_connection = true;
    }
    tracing::info!(
        "FTP {}W, cooldown {}s, buffer {}s ({} samples min), dropout {}s",
        settings.ftp,
        settings.cooldown_seconds,
        settings.buffer_seconds,
        settings.minimum_samples,
        settings.dropout_timeout
    );

    let service = FanService::with_ble(settings);
    let running = service.start().await;

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    running.shutdown().await;
    Ok(())
}
