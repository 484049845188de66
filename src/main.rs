//! Fleet Telemetry Gateway
//!
//! # Usage
//!
//! ```bash
//! # Run with ./gateway.toml (or $GATEWAY_CONFIG) plus environment overrides
//! ./telemetry-gateway
//!
//! # Explicit config file, JSON logs
//! ./telemetry-gateway --config /etc/telemetry/gateway.toml --log-json
//!
//! # Validate configuration and exit
//! ./telemetry-gateway --check-config
//! ```
//!
//! # Environment Variables
//!
//! - `TLS_KEY_PATH`, `TLS_CERT_PATH`, `TLS_CA_PATH`: listener key, chain and client CA bundle
//! - `TELEMETRY_HOST`, `PORT`: hostname and port vehicles are told to stream to
//! - `DASHBOARD_TOKEN` / `JWT_SECRET`: dashboard credentials
//! - `TESLA_CLIENT_ID`, `TESLA_CLIENT_SECRET`, `VEHICLE_IDS`: fleet API access
//! - `RUST_LOG`: Logging level (default: info)
//!
//! A `.env` file in the working directory is loaded first when present.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use telemetry_gateway::gateway::cancel_on_shutdown_signal;
use telemetry_gateway::{Gateway, GatewayConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "telemetry-gateway")]
#[command(about = "mTLS vehicle telemetry gateway with dashboard fan-out")]
#[command(version)]
struct CliArgs {
    /// Path to gateway.toml (otherwise $GATEWAY_CONFIG, then ./gateway.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listener bind address (e.g. "0.0.0.0:8443")
    #[arg(short, long)]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Load and validate configuration, then exit
    #[arg(long)]
    check_config: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_tracing(args.log_json);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let mut config =
        GatewayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = args.addr {
        config.server.bind_addr = addr;
    }

    if args.check_config {
        info!(
            bind_addr = %config.server.bind_addr,
            hostname = %config.server.hostname,
            port = config.server.port,
            vins = config.fleet.vins.len(),
            fields = config.fleet.fields.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Fleet Telemetry Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Graceful shutdown via Ctrl+C or SIGTERM
    let cancel_token = CancellationToken::new();
    cancel_on_shutdown_signal(cancel_token.clone()).context("Failed to install signal handlers")?;

    let gateway = Gateway::bind(config).await?;
    gateway.run(cancel_token).await?;

    info!("✓ Telemetry gateway shutdown complete");
    Ok(())
}
