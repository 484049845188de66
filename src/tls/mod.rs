//! TLS identity boundary.
//!
//! Every connection to the listener must present a client certificate that
//! chains to the configured CA bundle. Connections that fail verification are
//! dropped during the handshake and never reach the HTTP layer.
//!
//! - [`TlsMaterial`]: server key, server chain and client CA bundle, loaded once
//! - [`PeerIdentity`]: the verified peer's common name (or remote address)
//! - [`TlsListener`]: accept loop serving the axum router over mTLS

pub mod identity;
pub mod listener;

pub use identity::{common_name, PeerIdentity};
pub use listener::TlsListener;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::TlsPaths;

/// Errors raised while loading TLS material or serving the listener.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("private key error: {0}")]
    PrivateKey(String),

    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// PEM material for the listener, read from disk exactly once.
#[derive(Clone)]
pub struct TlsMaterial {
    key_pem: Vec<u8>,
    cert_chain_pem: String,
    ca_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("key_pem", &"<redacted>")
            .field("cert_chain_pem_len", &self.cert_chain_pem.len())
            .field("ca_pem_len", &self.ca_pem.len())
            .finish()
    }
}

/// Presence flags reported by the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSummary {
    pub key: bool,
    pub cert: bool,
    pub ca: bool,
    pub request_cert: bool,
    pub reject_unauthorized: bool,
}

impl TlsMaterial {
    /// Read key, chain and CA bundle from the configured paths.
    ///
    /// Any unreadable file is fatal: the gateway must not start a partial listener.
    pub fn load(paths: &TlsPaths) -> Result<Self, TlsError> {
        info!(path = %paths.key_path.display(), "Loading TLS key");
        let key_pem = read_file("TLS key", &paths.key_path)?;

        info!(path = %paths.cert_path.display(), "Loading TLS certificate chain");
        let cert_chain_pem = std::fs::read_to_string(&paths.cert_path).map_err(|source| {
            TlsError::Read {
                what: "TLS certificate chain",
                path: paths.cert_path.clone(),
                source,
            }
        })?;

        info!(path = %paths.ca_path.display(), "Loading client CA bundle");
        let ca_pem = read_file("client CA bundle", &paths.ca_path)?;

        Self::from_pem(key_pem, cert_chain_pem, ca_pem)
    }

    /// Build from in-memory PEM, checking that each part is non-empty.
    pub fn from_pem(
        key_pem: Vec<u8>,
        cert_chain_pem: String,
        ca_pem: Vec<u8>,
    ) -> Result<Self, TlsError> {
        if key_pem.is_empty() {
            return Err(TlsError::PrivateKey("key file is empty".into()));
        }
        if !cert_chain_pem.contains("BEGIN CERTIFICATE") {
            return Err(TlsError::Certificate(
                "certificate chain does not contain a PEM certificate".into(),
            ));
        }
        if ca_pem.is_empty() {
            return Err(TlsError::Certificate("CA bundle is empty".into()));
        }
        Ok(Self {
            key_pem,
            cert_chain_pem,
            ca_pem,
        })
    }

    /// The server certificate chain exactly as read from disk.
    pub fn cert_chain_pem(&self) -> &str {
        &self.cert_chain_pem
    }

    pub fn summary(&self) -> TlsSummary {
        TlsSummary {
            key: !self.key_pem.is_empty(),
            cert: !self.cert_chain_pem.is_empty(),
            ca: !self.ca_pem.is_empty(),
            request_cert: true,
            reject_unauthorized: true,
        }
    }

    /// Build a server config that mandates a client certificate chaining to the CA bundle.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let ca_certs = parse_certificates(&self.ca_pem)?;
        if ca_certs.is_empty() {
            return Err(TlsError::Certificate("no CA certificates found".into()));
        }
        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert).map_err(|e| {
                TlsError::Certificate(format!("failed to add CA certificate: {e}"))
            })?;
        }

        // No allow_unauthenticated(): a missing client certificate fails the handshake.
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| TlsError::Config(format!("client verifier error: {e}")))?;

        let chain = parse_certificates(self.cert_chain_pem.as_bytes())?;
        if chain.is_empty() {
            return Err(TlsError::Certificate("no server certificates found".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(&self.key_pem)
            .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {e}")))?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Config(format!("protocol versions: {e}")))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .map_err(|e| TlsError::Config(format!("server config error: {e}")))?;

        // WebSocket upgrades need HTTP/1.1.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }
}

fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}

/// Parse PEM-encoded certificates.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))
}
