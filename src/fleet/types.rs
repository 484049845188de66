//! Fleet API request and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::FieldConfig;
use crate::tls::parse_certificates;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("no VINs to configure")]
    NoVins,

    #[error("streaming hostname is empty")]
    NoHostname,

    #[error("no telemetry fields configured")]
    NoFields,

    #[error("CA chain is not usable: {0}")]
    InvalidCaChain(String),
}

/// Body of `POST /api/1/vehicles/fleet_telemetry_config`.
#[derive(Debug, Clone, Serialize)]
pub struct FleetTelemetryConfigRequest {
    pub vins: Vec<String>,
    pub config: StreamConfig,
}

/// Where and what the vehicles should stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub hostname: String,
    pub port: u16,
    /// Server certificate chain, PEM, byte-for-byte as read from disk.
    pub ca: String,
    pub fields: BTreeMap<String, FieldConfig>,
}

impl FleetTelemetryConfigRequest {
    pub fn new(
        vins: &[String],
        hostname: &str,
        port: u16,
        ca: &str,
        fields: &BTreeMap<String, FieldConfig>,
    ) -> Result<Self, RequestError> {
        if vins.is_empty() {
            return Err(RequestError::NoVins);
        }
        if hostname.is_empty() {
            return Err(RequestError::NoHostname);
        }
        if fields.is_empty() {
            return Err(RequestError::NoFields);
        }
        let certs = parse_certificates(ca.as_bytes())
            .map_err(|e| RequestError::InvalidCaChain(e.to_string()))?;
        if certs.is_empty() {
            return Err(RequestError::InvalidCaChain(
                "no PEM certificate found".into(),
            ));
        }

        Ok(Self {
            vins: vins.to_vec(),
            config: StreamConfig {
                hostname: hostname.to_string(),
                port,
                ca: ca.to_string(),
                fields: fields.clone(),
            },
        })
    }
}

/// Most fleet endpoints wrap their payload in `{"response": ...}`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub response: T,
}

/// Response to a configure call. Two shapes are seen in the wild:
/// per-VIN `results`, or a `response` summary with `skipped_vehicles` by reason.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigureResponse {
    #[serde(default)]
    pub results: Vec<VinResult>,
    #[serde(default)]
    pub response: Option<ConfigureSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VinResult {
    pub vin: String,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureSummary {
    #[serde(default)]
    pub updated_vehicles: Option<u64>,
    #[serde(default)]
    pub skipped_vehicles: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VinFailure {
    pub vin: String,
    pub reason: String,
}

/// Per-VIN outcome of one configure call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<VinFailure>,
}

impl ConfigureOutcome {
    /// VINs the response does not mention are counted as succeeded.
    pub fn from_response(requested: &[String], response: &ConfigureResponse) -> Self {
        let mut failures: BTreeMap<&str, String> = BTreeMap::new();

        for result in response.results.iter().filter(|r| !r.success) {
            let reason = result.reason.clone().unwrap_or_else(|| "unknown".into());
            failures.insert(result.vin.as_str(), reason);
        }

        if let Some(summary) = &response.response {
            for (reason, vins) in &summary.skipped_vehicles {
                let Value::Array(vins) = vins else { continue };
                for vin in vins.iter().filter_map(Value::as_str) {
                    if let Some(requested_vin) = requested.iter().find(|r| r.as_str() == vin) {
                        failures
                            .entry(requested_vin.as_str())
                            .or_insert_with(|| reason.clone());
                    }
                }
            }
        }

        let mut outcome = Self::default();
        for vin in requested {
            match failures.get(vin.as_str()) {
                Some(reason) => outcome.failed.push(VinFailure {
                    vin: vin.clone(),
                    reason: reason.clone(),
                }),
                None => outcome.succeeded.push(vin.clone()),
            }
        }
        outcome
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `GET /api/1/vehicles/{vin}/fleet_telemetry_config`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TelemetryConfigStatus {
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub key_paired: Option<bool>,
    #[serde(default)]
    pub limit_reached: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryErrorsResponse {
    #[serde(default)]
    pub fleet_telemetry_errors: Vec<TelemetryErrorEntry>,
}

/// One error a vehicle reported while streaming.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TelemetryErrorEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub vin: Option<String>,
}

/// Entry from `GET /api/1/vehicles`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct VehicleSummary {
    pub vin: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiHealthStatus {
    Ok,
    Error,
}

/// Result of a token-plus-list check against the fleet API.
#[derive(Debug, Clone, Serialize)]
pub struct ApiHealth {
    pub status: ApiHealthStatus,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
