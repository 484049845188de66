//! mTLS accept loop serving an axum router.
//!
//! `axum::serve` only speaks plain TCP, so each accepted socket is upgraded
//! with the rustls acceptor and then handed to hyper with upgrade support
//! (needed for WebSockets). The verified [`PeerIdentity`] rides along as a
//! request extension.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PeerIdentity, TlsError};

/// Backoff after a failed `accept()` (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound TCP listener plus the acceptor that enforces client certificates.
pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsListener {
    /// Bind the listener. Binding happens before any fleet configuration is pushed.
    pub async fn bind(
        addr: &str,
        server_config: Arc<ServerConfig>,
        handshake_timeout: Duration,
    ) -> Result<Self, TlsError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| TlsError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(server_config),
            handshake_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Each connection runs on its own task; a failing peer never affects the loop.
    pub async fn serve(self, app: Router, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Listener] Received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let acceptor = self.acceptor.clone();
                        let app = app.clone();
                        let timeout = self.handshake_timeout;
                        tokio::spawn(serve_connection(acceptor, stream, remote_addr, app, timeout));
                    }
                    Err(e) => {
                        warn!(error = %e, "[Listener] accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Router,
    handshake_timeout: Duration,
) {
    let tls = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            warn!(peer = %remote_addr, error = %e, "TLS handshake rejected");
            return;
        }
        Err(_) => {
            warn!(peer = %remote_addr, "TLS handshake timed out");
            return;
        }
    };

    let identity = {
        let (_, session) = tls.get_ref();
        PeerIdentity::from_peer_certificates(session.peer_certificates(), remote_addr)
    };
    debug!(peer = %identity, "TLS peer verified");

    let service = TowerToHyperService::new(app.layer(Extension(identity)));
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls), service)
        .await
    {
        debug!(peer = %remote_addr, error = %e, "connection ended with error");
    }
}
