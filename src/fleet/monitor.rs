//! Startup configuration push and the periodic telemetry-error poll.
//!
//! Both run after the listener is bound and never take the gateway down:
//! failures are logged and the loop carries on.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::FleetClient;
use super::types::ConfigureOutcome;

/// Push streaming configuration for every configured VIN once.
pub async fn configure_on_startup(client: &FleetClient, vins: &[String]) -> Option<ConfigureOutcome> {
    if vins.is_empty() {
        warn!("No VINs configured; skipping vehicle telemetry configuration");
        return None;
    }
    match client.configure_telemetry(vins).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(error = %e, "Initial vehicle configuration failed");
            None
        }
    }
}

/// Poll `get_telemetry_errors` for each VIN until cancelled.
pub async fn run_error_monitor(
    client: FleetClient,
    vins: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
) {
    if vins.is_empty() {
        return;
    }
    info!(vins = vins.len(), interval_secs = interval.as_secs(), "Telemetry error monitor started");

    loop {
        for vin in &vins {
            if cancel.is_cancelled() {
                return;
            }
            match client.get_telemetry_errors(vin).await {
                Ok(errors) if errors.is_empty() => info!(vin = %vin, "No telemetry errors"),
                Ok(errors) => {
                    for entry in errors {
                        warn!(
                            vin = %vin,
                            name = entry.name.as_deref().unwrap_or("unknown"),
                            error = entry.error.as_deref().unwrap_or(""),
                            "Vehicle reported telemetry error"
                        );
                    }
                }
                Err(e) => warn!(vin = %vin, error = %e, "Failed to fetch telemetry errors"),
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[ErrorMonitor] Received shutdown signal");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
