//! WebSocket upgrade handlers

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;
use futures::StreamExt;

use super::peer::VerifiedPeer;
use super::AppState;
use crate::broadcast::DashboardSession;
use crate::ingest::{TelemetryForwarder, VehicleSession};
use crate::tls::PeerIdentity;

/// First `token` parameter of the query string.
///
/// Repeated parameters never fail the request; whatever is found goes to the
/// authenticator, which rejects it on the open socket.
pub fn dashboard_token(params: Vec<(String, String)>) -> Option<String> {
    params
        .into_iter()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value)
}

/// GET /vehicle
pub async fn vehicle_socket(
    VerifiedPeer(identity): VerifiedPeer,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let forwarder: Arc<dyn TelemetryForwarder> = state.broadcaster.clone();
        VehicleSession::new(identity, state.decoder.clone(), forwarder, state.stats.clone())
            .run(stream, sink)
            .await;
    })
}

/// GET /dashboard?token=...
///
/// The upgrade is always accepted; authentication happens on the open socket
/// so a rejected client gets a 1008 close rather than an HTTP error.
pub async fn dashboard_socket(
    peer: Option<Extension<PeerIdentity>>,
    Query(params): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_addr = peer.map(|Extension(identity)| identity.remote_addr);
    let token = dashboard_token(params);
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        DashboardSession::new(
            remote_addr,
            state.authenticator.clone(),
            state.broadcaster.clone(),
        )
        .run(token, stream, sink)
        .await;
    })
}
