//! Verified-peer extractor

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::tls::PeerIdentity;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Identity of a peer whose client certificate passed the TLS handshake.
///
/// Rejects with 401 when the request did not arrive over the mTLS listener.
pub struct VerifiedPeer(pub PeerIdentity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for VerifiedPeer {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PeerIdentity>()
            .cloned()
            .map(VerifiedPeer)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "Client certificate required".to_string(),
                    }),
                )
            })
    }
}
