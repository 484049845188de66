//! System-wide default constants.
//!
//! Centralises the timing and protocol constants used across the gateway.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Listener
// ============================================================================

/// Default listener bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:443";

/// Default port advertised to vehicles in the fleet telemetry config.
pub const DEFAULT_ADVERTISED_PORT: u16 = 443;

/// Maximum time a peer gets to complete the TLS handshake (seconds).
pub const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// WebSocket path served to vehicles.
pub const VEHICLE_PATH: &str = "/vehicle";

/// WebSocket path served to dashboards.
pub const DASHBOARD_PATH: &str = "/dashboard";

// ============================================================================
// Dashboard fan-out
// ============================================================================

/// Frames buffered per dashboard before new frames are dropped for it.
pub const DASHBOARD_SEND_BUFFER: usize = 256;

// ============================================================================
// Fleet API
// ============================================================================

/// HTTP client timeout for token and fleet API requests (seconds).
pub const FLEET_HTTP_TIMEOUT_SECS: u64 = 30;

/// Safety margin subtracted from the issued token lifetime (seconds).
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Interval between telemetry-error polls per configured VIN (seconds). 300 = 5 min.
pub const TELEMETRY_ERROR_POLL_INTERVAL_SECS: u64 = 300;

/// Scope requested with the client-credentials grant.
pub const PARTNER_TOKEN_SCOPE: &str = "vehicle_device_data vehicle_cmds vehicle_location";

/// Default fleet API base URL (also the default token audience).
pub const FLEET_API_BASE_URL: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com";

/// Default OAuth token endpoint.
pub const FLEET_TOKEN_URL: &str = "https://auth.tesla.com/oauth2/v3/token";

/// Reason code reported when the virtual key is not paired for a VIN.
pub const MISSING_KEY_REASON: &str = "missing_key";

/// Signals streamed when no field map is configured, with their intervals (seconds).
///
/// An interval of 0 means "on change".
pub const DEFAULT_TELEMETRY_FIELDS: &[(&str, u32)] = &[
    ("ShiftState", 0),
    ("VehicleSpeed", 5),
    ("DriveBearing", 10),
    ("Location", 10),
    ("Elevation", 60),
    ("EstBatteryRange", 60),
    ("Heading", 10),
    ("Power", 5),
    ("Soc", 60),
];
