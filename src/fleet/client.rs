//! Fleet Client: HTTP client for the vehicle fleet API
//!
//! Pushes streaming configuration to vehicles and queries their streaming
//! state. Every call authenticates with a cached partner token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use super::token::TokenCache;
use super::types::{
    ApiEnvelope, ApiHealth, ApiHealthStatus, ConfigureOutcome, ConfigureResponse,
    FleetTelemetryConfigRequest, RequestError, TelemetryConfigStatus, TelemetryErrorEntry,
    TelemetryErrorsResponse, VehicleSummary,
};
use crate::config::{defaults, FieldConfig, FleetConfig};

/// Fleet client errors
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token request failed with status {status}: {body}")]
    Token {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("token response did not contain an access_token")]
    MissingAccessToken,
    #[error("{endpoint} returned status {status}: {body}")]
    Api {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("vehicle {0} is not visible to this partner account")]
    VehicleNotFound(String),
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where vehicles are told to stream, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub hostname: String,
    pub port: u16,
    /// The listener's certificate chain exactly as loaded.
    pub ca_chain: Arc<str>,
    pub fields: BTreeMap<String, FieldConfig>,
}

/// HTTP client for fleet API communication
#[derive(Clone)]
pub struct FleetClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
    target: StreamTarget,
    public_key_domain: Option<String>,
}

impl FleetClient {
    pub fn new(config: &FleetConfig, target: StreamTarget) -> Result<Self, FleetError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            tokens: Arc::new(TokenCache::new(config, http.clone())),
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            target,
            public_key_domain: config.public_key_domain.clone(),
        })
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Ask the fleet API to stream the configured fields from `vins` to this gateway.
    ///
    /// Per-VIN rejections are reported in the outcome, not as an error.
    pub async fn configure_telemetry(&self, vins: &[String]) -> Result<ConfigureOutcome, FleetError> {
        let request = FleetTelemetryConfigRequest::new(
            vins,
            &self.target.hostname,
            self.target.port,
            &self.target.ca_chain,
            &self.target.fields,
        )?;
        info!(
            vins = vins.len(),
            hostname = %self.target.hostname,
            port = self.target.port,
            fields = self.target.fields.len(),
            "Configuring vehicle telemetry"
        );

        let token = self.tokens.get_token().await?;
        let endpoint = "/api/1/vehicles/fleet_telemetry_config";
        let resp = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
                warn!(body = %body, "Fleet API rejected the configuration; check hostname, CA chain and field names");
            }
            return Err(FleetError::Api {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        let parsed: ConfigureResponse = if body.trim().is_empty() {
            ConfigureResponse::default()
        } else {
            serde_json::from_str(&body).unwrap_or_else(|e| {
                warn!(error = %e, "Unrecognised configure response; treating all VINs as configured");
                ConfigureResponse::default()
            })
        };
        let outcome = ConfigureOutcome::from_response(vins, &parsed);

        for failure in &outcome.failed {
            warn!(vin = %failure.vin, reason = %failure.reason, "Vehicle configuration failed");
            if failure.reason == defaults::MISSING_KEY_REASON {
                match &self.public_key_domain {
                    Some(domain) => warn!(
                        vin = %failure.vin,
                        pairing_link = %format!("https://tesla.com/_ak/{domain}"),
                        "Virtual key not paired; open the pairing link on the vehicle owner's phone"
                    ),
                    None => warn!(vin = %failure.vin, "Virtual key not paired with this vehicle"),
                }
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Vehicle configuration finished"
        );

        Ok(outcome)
    }

    /// Current streaming configuration and sync state of one vehicle.
    pub async fn get_telemetry_config_status(
        &self,
        vin: &str,
    ) -> Result<TelemetryConfigStatus, FleetError> {
        let envelope: ApiEnvelope<TelemetryConfigStatus> = self
            .get_json(&format!("/api/1/vehicles/{vin}/fleet_telemetry_config"))
            .await?;
        Ok(envelope.response)
    }

    /// Errors a vehicle reported while trying to stream.
    pub async fn get_telemetry_errors(&self, vin: &str) -> Result<Vec<TelemetryErrorEntry>, FleetError> {
        let envelope: ApiEnvelope<TelemetryErrorsResponse> = self
            .get_json(&format!("/api/1/vehicles/{vin}/fleet_telemetry_errors"))
            .await?;
        Ok(envelope.response.fleet_telemetry_errors)
    }

    pub async fn list_vehicles(&self) -> Result<Vec<VehicleSummary>, FleetError> {
        let envelope: ApiEnvelope<Vec<VehicleSummary>> = self.get_json("/api/1/vehicles").await?;
        Ok(envelope.response)
    }

    /// Latest vehicle state, addressed by the fleet API's vehicle id for `vin`.
    pub async fn get_vehicle_data(&self, vin: &str) -> Result<Value, FleetError> {
        let vehicle = self
            .list_vehicles()
            .await?
            .into_iter()
            .find(|v| v.vin == vin)
            .ok_or_else(|| FleetError::VehicleNotFound(vin.to_string()))?;
        // The API also accepts the VIN itself when no numeric id is listed.
        let key = vehicle.id.map_or_else(|| vin.to_string(), |id| id.to_string());

        let envelope: ApiEnvelope<Value> = self
            .get_json(&format!("/api/1/vehicles/{key}/vehicle_data"))
            .await?;
        Ok(envelope.response)
    }

    /// Register this application's partner domain with the fleet API.
    pub async fn register_partner_account(&self, domain: &str) -> Result<Value, FleetError> {
        info!(domain, "Registering partner account");
        let token = self.tokens.get_token().await?;
        let endpoint = "/api/1/partner_accounts";
        let resp = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "domain": domain }))
            .send()
            .await?;
        Self::parse(endpoint, resp).await
    }

    /// Public key the fleet API holds for a registered partner domain.
    pub async fn get_partner_public_key(&self, domain: &str) -> Result<Value, FleetError> {
        let token = self.tokens.get_token().await?;
        let endpoint = "/api/1/partner_accounts/public_key";
        let resp = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&token)
            .query(&[("domain", domain)])
            .send()
            .await?;
        Self::parse(endpoint, resp).await
    }

    /// Token fetch plus a vehicle listing; never returns an error.
    pub async fn check_api_health(&self) -> ApiHealth {
        let (status, message) = match self.list_vehicles().await {
            Ok(vehicles) => (
                ApiHealthStatus::Ok,
                format!("Fleet API reachable, {} vehicles visible", vehicles.len()),
            ),
            Err(e) => (ApiHealthStatus::Error, e.to_string()),
        };
        ApiHealth {
            status,
            message,
            timestamp: chrono::Utc::now(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, FleetError> {
        let token = self.tokens.get_token().await?;
        let resp = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&token)
            .send()
            .await?;
        Self::parse(endpoint, resp).await
    }

    async fn parse<T: DeserializeOwned>(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<T, FleetError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FleetError::Api {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
