//! Dashboard token verification.

use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{DashboardAuthMode, DashboardConfig};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,

    #[error("token does not match")]
    Mismatch,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("dashboard authentication misconfigured: {0}")]
    Misconfigured(&'static str),
}

/// An authenticated dashboard client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardPrincipal {
    /// Subject used in logs.
    pub subject: String,
}

pub trait DashboardAuthenticator: Send + Sync {
    /// Strategy name used in logs.
    fn strategy(&self) -> &'static str;

    fn verify(&self, token: Option<&str>) -> Result<DashboardPrincipal, AuthError>;
}

/// Compares the presented token with a configured secret in constant time.
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl DashboardAuthenticator for SharedSecretAuthenticator {
    fn strategy(&self) -> &'static str {
        "shared_secret"
    }

    fn verify(&self, token: Option<&str>) -> Result<DashboardPrincipal, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        if bool::from(token.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(DashboardPrincipal {
                subject: "dashboard".into(),
            })
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DashboardClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// Verifies HS256 tokens: signature, `exp`, and `iss` when an issuer is configured.
pub struct SignedTokenAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl SignedTokenAuthenticator {
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match issuer {
            Some(iss) => {
                // set_issuer alone lets a token without `iss` through.
                validation.set_required_spec_claims(&["exp", "iss"]);
                validation.set_issuer(&[iss]);
            }
            None => validation.set_required_spec_claims(&["exp"]),
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl DashboardAuthenticator for SignedTokenAuthenticator {
    fn strategy(&self) -> &'static str {
        "signed_token"
    }

    fn verify(&self, token: Option<&str>) -> Result<DashboardPrincipal, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        let data = decode::<DashboardClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(DashboardPrincipal {
            subject: data.claims.sub.unwrap_or_else(|| "anonymous".into()),
        })
    }
}

/// Authenticator for the configured strategy.
pub fn authenticator_for(
    config: &DashboardConfig,
) -> Result<Arc<dyn DashboardAuthenticator>, AuthError> {
    match config.auth {
        DashboardAuthMode::SharedSecret => {
            let secret = config
                .token
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or(AuthError::Misconfigured("dashboard.token is not set"))?;
            Ok(Arc::new(SharedSecretAuthenticator::new(secret)))
        }
        DashboardAuthMode::SignedToken => {
            let secret = config
                .jwt_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or(AuthError::Misconfigured("dashboard.jwt_secret is not set"))?;
            Ok(Arc::new(SignedTokenAuthenticator::new(
                secret.as_bytes(),
                config.jwt_issuer.as_deref(),
            )))
        }
    }
}
