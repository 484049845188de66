//! Partner access token cache (OAuth client-credentials grant).
//!
//! A cached token is reused until `issued + lifetime - 60s`. Refresh is
//! single-flight: the cache lock is held across the token request, so
//! concurrent callers wait for one in-flight fetch instead of issuing their
//! own. A failed refresh leaves the previous cache state untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::FleetError;
use crate::config::{defaults, FleetConfig};

#[derive(Debug, Clone)]
struct PartnerToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Lifetime assumed when the authorization server omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

pub struct TokenCache {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    audience: String,
    scope: String,
    cached: Mutex<Option<PartnerToken>>,
    fetches: AtomicU64,
}

impl TokenCache {
    pub fn new(config: &FleetConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            audience: config.audience().to_string(),
            scope: config.scope.clone(),
            cached: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// A valid bearer token, fetching a new one only when the cached one has expired.
    pub async fn get_token(&self) -> Result<String, FleetError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                debug!("Using cached partner token");
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Number of token requests sent so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn fetch(&self) -> Result<PartnerToken, FleetError> {
        info!(url = %self.token_url, "Requesting partner token");
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let requested_at = Instant::now();

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("audience", self.audience.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let resp = self.http.post(&self.token_url).form(&form).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                error!(%status, "Partner token rejected; check client id, client secret and scope");
            } else {
                error!(%status, body = %body, "Partner token request failed");
            }
            return Err(FleetError::Token { status, body });
        }

        let parsed: TokenResponse = resp.json().await?;
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(FleetError::MissingAccessToken)?;
        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let usable = lifetime.saturating_sub(defaults::TOKEN_EXPIRY_MARGIN_SECS);

        info!(expires_in = lifetime, "Obtained partner token");
        Ok(PartnerToken {
            access_token,
            expires_at: requested_at + Duration::from_secs(usable),
        })
    }
}
