//! tickflow bot entry point.
//!
//! Streams ticks, keeps per-symbol digit statistics and trades digit
//! contracts until the session reaches its target or stop loss.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Digit-statistics trading bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKFLOW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Watch the feed and log signals without placing contracts
    #[arg(long)]
    observe_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any WS connection
    tickflow_ws::init_crypto();

    let args = Args::parse();

    tickflow_telemetry::init_logging()?;

    info!("Starting tickflow bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TICKFLOW_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKFLOW_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = tickflow_bot::AppConfig::from_file(&config_path)?;
    if args.observe_only {
        config.observe_only = true;
    }
    info!(
        ws_url = %config.ws_url,
        markets = config.markets.len(),
        observe_only = config.observe_only,
        "Configuration loaded"
    );

    let app = tickflow_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
