//! HTTP surface served over the mTLS listener.
//!
//! ## Routes
//!
//! - `GET /vehicle`: WebSocket upgrade for verified vehicles
//! - `GET /dashboard?token=...`: WebSocket upgrade for dashboard clients
//! - `GET /health`: liveness and counters
//!
//! Anything else is a plain 404.

pub mod health;
pub mod peer;
pub mod sockets;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::broadcast::{Broadcaster, DashboardAuthenticator};
use crate::config::defaults;
use crate::stats::GatewayStats;
use crate::telemetry::TelemetryDecoder;
use crate::tls::TlsSummary;

/// Shared state for all handlers. Built once at startup and passed in explicitly.
pub struct GatewayState {
    pub decoder: Arc<dyn TelemetryDecoder>,
    pub authenticator: Arc<dyn DashboardAuthenticator>,
    pub broadcaster: Arc<Broadcaster>,
    pub stats: Arc<GatewayStats>,
    pub tls: TlsSummary,
    pub started_at: Instant,
}

pub type AppState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        decoder: Arc<dyn TelemetryDecoder>,
        authenticator: Arc<dyn DashboardAuthenticator>,
        broadcaster: Arc<Broadcaster>,
        tls: TlsSummary,
    ) -> Self {
        Self {
            decoder,
            authenticator,
            broadcaster,
            stats: Arc::new(GatewayStats::default()),
            tls,
            started_at: Instant::now(),
        }
    }
}

/// Create the router with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(defaults::VEHICLE_PATH, get(sockets::vehicle_socket))
        .route(defaults::DASHBOARD_PATH, get(sockets::dashboard_socket))
        .route("/health", get(health::get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
