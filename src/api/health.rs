//! Health check endpoint

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::config::defaults;
use crate::stats::MessageCounts;
use crate::tls::TlsSummary;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub tls: TlsSummary,
    pub websocket_endpoints: WebsocketEndpoints,
    pub connections: Connections,
    pub messages: MessageCounts,
}

#[derive(Debug, Serialize)]
pub struct WebsocketEndpoints {
    pub vehicle: &'static str,
    pub dashboard: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Connections {
    pub vehicles: usize,
    pub dashboards: usize,
}

pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        tls: state.tls,
        websocket_endpoints: WebsocketEndpoints {
            vehicle: defaults::VEHICLE_PATH,
            dashboard: defaults::DASHBOARD_PATH,
        },
        connections: Connections {
            vehicles: state.stats.vehicles(),
            dashboards: state.broadcaster.member_count(),
        },
        messages: state.stats.messages(),
    })
}
