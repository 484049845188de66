//! Peer identity extracted from a verified TLS session.

use std::fmt;
use std::net::SocketAddr;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Identity of a peer whose certificate already passed verification.
///
/// Attached to every request served over the listener as an axum `Extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject common name of the leaf certificate, often the VIN.
    pub common_name: Option<String>,
    pub remote_addr: SocketAddr,
}

impl PeerIdentity {
    /// Build from the peer chain rustls exposes after the handshake.
    pub fn from_peer_certificates(
        certs: Option<&[CertificateDer<'_>]>,
        remote_addr: SocketAddr,
    ) -> Self {
        let common_name = certs
            .and_then(|chain| chain.first())
            .and_then(|leaf| common_name(leaf.as_ref()));
        Self {
            common_name,
            remote_addr,
        }
    }

    /// Common name when present, remote address otherwise.
    pub fn id(&self) -> String {
        match &self.common_name {
            Some(cn) => cn.clone(),
            None => self.remote_addr.to_string(),
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.common_name {
            Some(cn) => write!(f, "{cn} ({})", self.remote_addr),
            None => write!(f, "{}", self.remote_addr),
        }
    }
}

/// Subject common name of a DER certificate, if it has a UTF-8 one.
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let cn = cert.subject().iter_common_name().next()?;
    cn.as_str().ok().map(str::to_string)
}
