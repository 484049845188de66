//! Gateway Configuration - listener, TLS material, dashboard auth, fleet API
//!
//! Each section implements `Default` so a partial TOML file (or none at all)
//! plus environment variables is enough to describe a deployment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one gateway process.
///
/// Load with `GatewayConfig::load()` which searches:
/// 1. the explicit path, if given
/// 2. `$GATEWAY_CONFIG`
/// 3. `./gateway.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener and advertised endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// TLS material locations
    #[serde(default)]
    pub tls: TlsPaths,

    /// Dashboard authentication and fan-out
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Vehicle payload decoding
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Fleet API credentials and streaming configuration
    #[serde(default)]
    pub fleet: FleetConfig,
}

impl GatewayConfig {
    /// Resolve, overlay environment variables and validate.
    ///
    /// Any failure here is a fatal startup error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(explicit)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_file(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. Explicit path must exist
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded gateway config from --config");
            return Ok(config);
        }

        // 2. Check env var
        if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded gateway config from GATEWAY_CONFIG");
                return Ok(config);
            }
            warn!(path = %path, "GATEWAY_CONFIG points to non-existent file, falling back");
        }

        // 3. Check ./gateway.toml
        let local = PathBuf::from("gateway.toml");
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded gateway config from ./gateway.toml");
            return Ok(config);
        }

        // 4. Defaults
        info!("No gateway.toml found, using built-in defaults and environment");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path (no environment overlay, no validation).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Overlay values from environment variables.
    ///
    /// `lookup` abstracts the environment so callers can supply a fixed map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("TELEMETRY_HOST") {
            self.server.hostname = normalize_hostname(&host);
        }
        if let Some(port) = get("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PORT",
                reason: format!("not a port number: {port}"),
            })?;
            self.server.port = port;
            self.server.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(addr) = get("BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(p) = get("TLS_KEY_PATH") {
            self.tls.key_path = PathBuf::from(p);
        }
        if let Some(p) = get("TLS_CERT_PATH") {
            self.tls.cert_path = PathBuf::from(p);
        }
        if let Some(p) = get("TLS_CA_PATH") {
            self.tls.ca_path = PathBuf::from(p);
        }

        if let Some(mode) = get("DASHBOARD_AUTH") {
            self.dashboard.auth = match mode.trim() {
                "shared_secret" => DashboardAuthMode::SharedSecret,
                "signed_token" => DashboardAuthMode::SignedToken,
                other => {
                    return Err(ConfigError::InvalidEnv {
                        var: "DASHBOARD_AUTH",
                        reason: format!("expected shared_secret or signed_token, got {other}"),
                    })
                }
            };
        }
        if let Some(token) = get("DASHBOARD_TOKEN") {
            self.dashboard.token = Some(token);
        }
        if let Some(secret) = get("JWT_SECRET") {
            self.dashboard.jwt_secret = Some(secret);
        }
        if let Some(issuer) = get("JWT_ISSUER") {
            self.dashboard.jwt_issuer = Some(issuer);
        }

        if let Some(v) = get("TESLA_CLIENT_ID") {
            self.fleet.client_id = v;
        }
        if let Some(v) = get("TESLA_CLIENT_SECRET") {
            self.fleet.client_secret = v;
        }
        if let Some(v) = get("TESLA_API_BASE_URL") {
            self.fleet.api_base_url = v;
        }
        if let Some(v) = get("TESLA_AUDIENCE") {
            self.fleet.audience = Some(v);
        }
        if let Some(v) = get("TESLA_TOKEN_URL") {
            self.fleet.token_url = v;
        }
        if let Some(v) = get("PUBLIC_KEY_DOMAIN") {
            self.fleet.public_key_domain = Some(v);
        }
        if let Some(raw) = get("VEHICLE_IDS") {
            let vins: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if vins.is_empty() {
                warn!("VEHICLE_IDS provided but no VINs could be parsed; check comma separation");
            }
            self.fleet.vins = vins;
        }
        if let Some(raw) = get("TELEMETRY_FIELDS") {
            self.fleet.fields =
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidEnv {
                    var: "TELEMETRY_FIELDS",
                    reason: format!("invalid JSON: {e}"),
                })?;
        }

        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Collects every problem so operators can fix them in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.server;
        if s.hostname.trim().is_empty() {
            errors.push("server.hostname (TELEMETRY_HOST) is required".to_string());
        }
        if s.bind_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("server.bind_addr is not a socket address: {}", s.bind_addr));
        }
        if s.port == 0 {
            errors.push("server.port must be > 0".to_string());
        }

        let t = &self.tls;
        for (name, path) in [
            ("tls.key_path (TLS_KEY_PATH)", &t.key_path),
            ("tls.cert_path (TLS_CERT_PATH)", &t.cert_path),
            ("tls.ca_path (TLS_CA_PATH)", &t.ca_path),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(format!("{name} is required"));
            }
        }
        if t.handshake_timeout_secs == 0 {
            errors.push("tls.handshake_timeout_secs must be > 0".to_string());
        }

        let d = &self.dashboard;
        match d.auth {
            DashboardAuthMode::SharedSecret => {
                if d.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    errors.push(
                        "dashboard.token (DASHBOARD_TOKEN) is required for shared_secret auth"
                            .to_string(),
                    );
                }
            }
            DashboardAuthMode::SignedToken => {
                if d.jwt_secret.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    errors.push(
                        "dashboard.jwt_secret (JWT_SECRET) is required for signed_token auth"
                            .to_string(),
                    );
                }
            }
        }
        if d.send_buffer == 0 {
            errors.push("dashboard.send_buffer must be > 0".to_string());
        }

        let f = &self.fleet;
        if f.enabled {
            for (name, value) in [
                ("fleet.client_id (TESLA_CLIENT_ID)", &f.client_id),
                ("fleet.client_secret (TESLA_CLIENT_SECRET)", &f.client_secret),
                ("fleet.api_base_url (TESLA_API_BASE_URL)", &f.api_base_url),
                ("fleet.token_url (TESLA_TOKEN_URL)", &f.token_url),
            ] {
                if value.trim().is_empty() {
                    errors.push(format!("{name} is required when the fleet client is enabled"));
                }
            }
            if f.request_timeout_secs == 0 {
                errors.push("fleet.request_timeout_secs must be > 0".to_string());
            }
            if f.error_poll_interval_secs == 0 {
                errors.push("fleet.error_poll_interval_secs must be > 0".to_string());
            }
            if f.fields.is_empty() {
                errors.push("fleet.fields must name at least one signal".to_string());
            }
            for vin in &f.vins {
                if vin.len() != 17 {
                    warn!(vin = %vin, "VIN is not 17 characters; the fleet API will likely reject it");
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Reduce `https://host:port/path` style values to the bare host name.
pub fn normalize_hostname(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        if let Ok(url) = reqwest::Url::parse(raw) {
            if let Some(host) = url.host_str() {
                return host.to_string();
            }
        }
    }
    raw.trim_end_matches('/').to_string()
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    InvalidEnv { var: &'static str, reason: String },
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::InvalidEnv { var, reason } => {
                write!(f, "Invalid environment variable {var}: {reason}")
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Server
// ============================================================================

/// Listener and the endpoint advertised to vehicles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the mTLS listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Host name vehicles connect to. Must match the server certificate SAN.
    #[serde(default)]
    pub hostname: String,
    /// Port advertised in the fleet telemetry config.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    defaults::DEFAULT_BIND_ADDR.to_string()
}

fn default_port() -> u16 {
    defaults::DEFAULT_ADVERTISED_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            hostname: String::new(),
            port: default_port(),
        }
    }
}

// ============================================================================
// TLS
// ============================================================================

/// Locations of the server key, server certificate chain and client CA bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsPaths {
    #[serde(default)]
    pub key_path: PathBuf,
    /// Full server chain; also sent verbatim as `ca` in the fleet telemetry config.
    #[serde(default)]
    pub cert_path: PathBuf,
    /// CA bundle that vehicle client certificates must chain to.
    #[serde(default)]
    pub ca_path: PathBuf,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    defaults::TLS_HANDSHAKE_TIMEOUT_SECS
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            key_path: PathBuf::new(),
            cert_path: PathBuf::new(),
            ca_path: PathBuf::new(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

// ============================================================================
// Dashboard
// ============================================================================

/// How dashboard tokens are verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardAuthMode {
    /// Constant-time comparison against `dashboard.token`.
    #[default]
    SharedSecret,
    /// HS256 JWT signed with `dashboard.jwt_secret`.
    SignedToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub auth: DashboardAuthMode,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim; unchecked when absent.
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

fn default_send_buffer() -> usize {
    defaults::DASHBOARD_SEND_BUFFER
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            auth: DashboardAuthMode::default(),
            token: None,
            jwt_secret: None,
            jwt_issuer: None,
            send_buffer: default_send_buffer(),
        }
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// Which payload decoder the vehicle channel uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    #[default]
    Json,
    OpaqueBinary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub decoder: DecoderKind,
}

// ============================================================================
// Fleet API
// ============================================================================

/// Sampling interval for one streamed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub interval_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Disable to run the listener without any fleet API traffic.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Token audience; defaults to `api_base_url`.
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// VINs configured for streaming at startup.
    #[serde(default)]
    pub vins: Vec<String>,
    /// Domain hosting the partner public key, used in pairing hints.
    #[serde(default)]
    pub public_key_domain: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_error_poll_interval")]
    pub error_poll_interval_secs: u64,
    #[serde(default = "default_fields")]
    pub fields: BTreeMap<String, FieldConfig>,
}

impl FleetConfig {
    /// Audience sent with the client-credentials grant.
    pub fn audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.api_base_url)
    }
}

fn default_true() -> bool {
    true
}

fn default_api_base_url() -> String {
    defaults::FLEET_API_BASE_URL.to_string()
}

fn default_token_url() -> String {
    defaults::FLEET_TOKEN_URL.to_string()
}

fn default_scope() -> String {
    defaults::PARTNER_TOKEN_SCOPE.to_string()
}

fn default_request_timeout() -> u64 {
    defaults::FLEET_HTTP_TIMEOUT_SECS
}

fn default_error_poll_interval() -> u64 {
    defaults::TELEMETRY_ERROR_POLL_INTERVAL_SECS
}

fn default_fields() -> BTreeMap<String, FieldConfig> {
    defaults::DEFAULT_TELEMETRY_FIELDS
        .iter()
        .map(|(name, secs)| ((*name).to_string(), FieldConfig { interval_seconds: *secs }))
        .collect()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            api_base_url: default_api_base_url(),
            token_url: default_token_url(),
            client_id: String::new(),
            client_secret: String::new(),
            audience: None,
            scope: default_scope(),
            vins: Vec::new(),
            public_key_domain: None,
            request_timeout_secs: default_request_timeout(),
            error_poll_interval_secs: default_error_poll_interval(),
            fields: default_fields(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TELEMETRY_HOST", "telemetry.example.com"),
            ("TLS_KEY_PATH", "/certs/server.key"),
            ("TLS_CERT_PATH", "/certs/server.crt"),
            ("TLS_CA_PATH", "/certs/ca.crt"),
            ("DASHBOARD_TOKEN", "dash-secret"),
            ("TESLA_CLIENT_ID", "client"),
            ("TESLA_CLIENT_SECRET", "secret"),
        ]
    }

    #[test]
    fn test_default_config_is_incomplete() {
        let config = GatewayConfig::default();
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("defaults must not validate without deployment values");
        };
        assert!(errors.iter().any(|e| e.contains("server.hostname")));
        assert!(errors.iter().any(|e| e.contains("tls.key_path")));
        assert!(errors.iter().any(|e| e.contains("DASHBOARD_TOKEN")));
        assert!(errors.iter().any(|e| e.contains("TESLA_CLIENT_ID")));
    }

    #[test]
    fn test_env_overlay_produces_valid_config() {
        let mut config = GatewayConfig::default();
        config.apply_env(env(&complete_env())).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.hostname, "telemetry.example.com");
        assert_eq!(config.fleet.audience(), defaults::FLEET_API_BASE_URL);
    }

    #[test]
    fn test_port_env_sets_bind_and_advertised_port() {
        let mut vars = complete_env();
        vars.push(("PORT", "8443"));
        let mut config = GatewayConfig::default();
        config.apply_env(env(&vars)).unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.bind_addr, "0.0.0.0:8443");
    }

    #[test]
    fn test_vehicle_ids_are_split_and_trimmed() {
        let mut vars = complete_env();
        vars.push(("VEHICLE_IDS", " 5YJ3E1EA7KF000001, ,5YJ3E1EA7KF000002 "));
        let mut config = GatewayConfig::default();
        config.apply_env(env(&vars)).unwrap();
        assert_eq!(config.fleet.vins, vec!["5YJ3E1EA7KF000001", "5YJ3E1EA7KF000002"]);
    }

    #[test]
    fn test_telemetry_fields_json_replaces_defaults() {
        let mut vars = complete_env();
        vars.push(("TELEMETRY_FIELDS", r#"{"Soc":{"interval_seconds":30}}"#));
        let mut config = GatewayConfig::default();
        config.apply_env(env(&vars)).unwrap();
        assert_eq!(config.fleet.fields.len(), 1);
        assert_eq!(config.fleet.fields["Soc"].interval_seconds, 30);
    }

    #[test]
    fn test_invalid_telemetry_fields_json_is_rejected() {
        let mut config = GatewayConfig::default();
        let result = config.apply_env(env(&[("TELEMETRY_FIELDS", "{not json")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { var: "TELEMETRY_FIELDS", .. })
        ));
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let mut config = GatewayConfig::default();
        let result =
            config.apply_env(env(&[("TELEMETRY_FIELDS", r#"{"Soc":{"interval_seconds":-5}}"#)]));
        assert!(result.is_err());
    }

    #[test]
    fn test_signed_token_mode_requires_jwt_secret() {
        let mut vars = complete_env();
        vars.push(("DASHBOARD_AUTH", "signed_token"));
        let mut config = GatewayConfig::default();
        config.apply_env(env(&vars)).unwrap();
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("signed_token without JWT_SECRET must fail");
        };
        assert!(errors.iter().any(|e| e.contains("JWT_SECRET")));
    }

    #[test]
    fn test_disabled_fleet_skips_credential_checks() {
        let mut config = GatewayConfig::default();
        config
            .apply_env(env(&[
                ("TELEMETRY_HOST", "t.example.com"),
                ("TLS_KEY_PATH", "k"),
                ("TLS_CERT_PATH", "c"),
                ("TLS_CA_PATH", "a"),
                ("DASHBOARD_TOKEN", "x"),
            ]))
            .unwrap();
        config.fleet.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_hostname_is_extracted_from_url() {
        assert_eq!(normalize_hostname("https://telemetry.example.com:443/"), "telemetry.example.com");
        assert_eq!(normalize_hostname("telemetry.example.com"), "telemetry.example.com");
    }

    #[test]
    fn test_toml_round_trip_of_sections() {
        let raw = r#"
            [server]
            hostname = "t.example.com"
            port = 4443

            [dashboard]
            auth = "signed_token"
            jwt_secret = "s"

            [ingest]
            decoder = "opaque_binary"

            [fleet]
            vins = ["5YJ3E1EA7KF000001"]

            [fleet.fields]
            VehicleSpeed = { interval_seconds = 1 }
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 4443);
        assert_eq!(config.server.bind_addr, defaults::DEFAULT_BIND_ADDR);
        assert_eq!(config.dashboard.auth, DashboardAuthMode::SignedToken);
        assert_eq!(config.ingest.decoder, DecoderKind::OpaqueBinary);
        assert_eq!(config.fleet.fields.len(), 1);
        assert!(config.fleet.enabled);
    }
}
