//! Fleet Telemetry Gateway
//!
//! Terminates mutually-authenticated vehicle WebSocket connections, acknowledges
//! every telemetry message, fans decoded telemetry out to authenticated
//! dashboards, and configures vehicles through the fleet API to stream here.
//!
//! ## Architecture
//!
//! - **tls**: certificate material, client verification, the accept loop
//! - **ingest**: per-vehicle ack/nack session
//! - **broadcast**: dashboard authentication and fan-out
//! - **fleet**: partner token cache and fleet API client
//! - **api**: routes and the health endpoint
//! - **gateway**: startup ordering and task supervision

pub mod api;
pub mod broadcast;
pub mod config;
pub mod fleet;
pub mod gateway;
pub mod ingest;
pub mod stats;
pub mod telemetry;
pub mod tls;

pub use api::{create_app, AppState, GatewayState};
pub use broadcast::Broadcaster;
pub use config::GatewayConfig;
pub use fleet::{FleetClient, FleetError};
pub use gateway::Gateway;
pub use ingest::{TelemetryForwarder, VehicleSession};
pub use telemetry::{TelemetryDecoder, TelemetryMap, TelemetryMessage};
pub use tls::{PeerIdentity, TlsMaterial};
