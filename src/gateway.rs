//! Process wiring: TLS material, listener, fleet tasks and the supervisor.
//!
//! Startup order is fixed. TLS material is loaded first and any failure is
//! fatal. The listener is bound before the fleet API is asked to point
//! vehicles at it. Fleet failures are logged and never stop the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{create_app, AppState, GatewayState};
use crate::broadcast::{authenticator_for, Broadcaster};
use crate::config::GatewayConfig;
use crate::fleet::{configure_on_startup, run_error_monitor, FleetClient, StreamTarget};
use crate::telemetry::decoder_for;
use crate::tls::{TlsListener, TlsMaterial};

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Listener,
    FleetMonitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Listener => write!(f, "Listener"),
            TaskName::FleetMonitor => write!(f, "FleetMonitor"),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// A gateway whose listener is bound but not yet serving.
pub struct Gateway {
    config: GatewayConfig,
    listener: TlsListener,
    state: AppState,
    fleet: Option<FleetClient>,
}

impl Gateway {
    /// Load TLS material, build shared state and bind the listener.
    pub async fn bind(config: GatewayConfig) -> Result<Self> {
        let material = TlsMaterial::load(&config.tls).context("Failed to load TLS material")?;
        let server_config = material
            .server_config()
            .context("Failed to build TLS server configuration")?;

        let decoder = decoder_for(config.ingest.decoder);
        let authenticator = authenticator_for(&config.dashboard)?;
        info!(
            decoder = decoder.name(),
            dashboard_auth = authenticator.strategy(),
            "Gateway components ready"
        );
        let broadcaster = Arc::new(Broadcaster::new(config.dashboard.send_buffer));
        let state = Arc::new(GatewayState::new(
            decoder,
            authenticator,
            broadcaster,
            material.summary(),
        ));

        let fleet = if config.fleet.enabled {
            let target = StreamTarget {
                hostname: config.server.hostname.clone(),
                port: config.server.port,
                ca_chain: Arc::from(material.cert_chain_pem()),
                fields: config.fleet.fields.clone(),
            };
            Some(FleetClient::new(&config.fleet, target).context("Failed to build fleet API client")?)
        } else {
            info!("Fleet API integration disabled");
            None
        };

        let listener = TlsListener::bind(
            &config.server.bind_addr,
            server_config,
            Duration::from_secs(config.tls.handshake_timeout_secs),
        )
        .await?;
        info!(
            addr = %listener.local_addr()?,
            advertised = %format!("{}:{}", config.server.hostname, config.server.port),
            "mTLS listener bound"
        );

        Ok(Self {
            config,
            listener,
            state,
            fleet,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> AppState {
        Arc::clone(&self.state)
    }

    /// Serve until `cancel` fires or a supervised task fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

        spawn_listener(
            &mut task_set,
            self.listener,
            create_app(self.state),
            cancel.clone(),
        );

        if let Some(client) = self.fleet {
            spawn_fleet_tasks(
                &mut task_set,
                client,
                self.config.fleet.vins.clone(),
                Duration::from_secs(self.config.fleet.error_poll_interval_secs),
                cancel.clone(),
            );
        }

        run_supervisor(&mut task_set, cancel).await
    }
}

/// Cancel `token` on Ctrl+C or, on Unix, SIGTERM.
///
/// Handlers are installed before this returns, so a signal sent afterwards is
/// never lost to the default disposition.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("🛑 Received SIGTERM, initiating shutdown...");
                sigterm_token.cancel();
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Received Ctrl+C, initiating shutdown...");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
    Ok(())
}

/// Spawn the mTLS listener task into the JoinSet.
fn spawn_listener(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: TlsListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Listener] Task starting");
        listener.serve(app, cancel_token).await;
        info!("[Listener] Shutdown complete");
        Ok(TaskName::Listener)
    });
}

/// Spawn the startup configuration push followed by the error monitor.
fn spawn_fleet_tasks(
    task_set: &mut JoinSet<Result<TaskName>>,
    client: FleetClient,
    vins: Vec<String>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[FleetMonitor] Task starting");
        tokio::select! {
            _ = cancel_token.cancelled() => return Ok(TaskName::FleetMonitor),
            _ = configure_on_startup(&client, &vins) => {}
        }
        run_error_monitor(client, vins, poll_interval, cancel_token).await;
        Ok(TaskName::FleetMonitor)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Every task watches the same token; let them finish their shutdown logging.
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("🔒 Supervisor: Task {} stopped", task_name);
        }
    }

    Ok(())
}
