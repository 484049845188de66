//! Fleet API integration
//!
//! Tells vehicles to stream to this gateway and watches whether they do.
//!
//! ## Architecture
//!
//! - **TokenCache**: client-credentials partner token, refreshed 60 s before expiry
//! - **FleetClient**: configure / status / errors / partner account calls
//! - **monitor**: startup configuration push and periodic error polling
//!
//! The listener never depends on this module: every failure here is logged
//! and the gateway keeps serving.

pub mod client;
pub mod monitor;
pub mod token;
pub mod types;

pub use client::{FleetClient, FleetError, StreamTarget};
pub use monitor::{configure_on_startup, run_error_monitor};
pub use token::TokenCache;
pub use types::{
    ApiHealth, ApiHealthStatus, ConfigureOutcome, FleetTelemetryConfigRequest, RequestError,
    TelemetryConfigStatus, TelemetryErrorEntry, VehicleSummary, VinFailure,
};
