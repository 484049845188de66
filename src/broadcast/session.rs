//! One dashboard WebSocket connection.

use std::borrow::Cow;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use super::{Broadcaster, DashboardAuthenticator};
use crate::telemetry::DashboardFrame;

pub struct DashboardSession {
    remote_addr: Option<SocketAddr>,
    authenticator: Arc<dyn DashboardAuthenticator>,
    broadcaster: Arc<Broadcaster>,
}

impl DashboardSession {
    pub fn new(
        remote_addr: Option<SocketAddr>,
        authenticator: Arc<dyn DashboardAuthenticator>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            remote_addr,
            authenticator,
            broadcaster,
        }
    }

    /// Authenticate, then relay broadcast frames until either side goes away.
    ///
    /// A rejected client receives only a policy-violation close frame.
    pub async fn run<S, K, E>(self, token: Option<String>, mut inbound: S, mut outbound: K)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        let peer = self
            .remote_addr
            .map_or_else(|| "unknown".to_string(), |a| a.to_string());

        let principal = match self.authenticator.verify(token.as_deref()) {
            Ok(principal) => principal,
            Err(e) => {
                warn!(%peer, strategy = self.authenticator.strategy(), reason = %e, "Dashboard authentication failed");
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Cow::Borrowed("Unauthorized"),
                }));
                if let Err(e) = outbound.send(close).await {
                    debug!(%peer, error = %e, "Failed to send close frame");
                }
                return;
            }
        };

        let greeting = DashboardFrame::AuthSuccess {
            message: "Authentication successful",
        };
        match greeting.to_json() {
            Ok(text) => {
                if let Err(e) = outbound.send(Message::Text(text)).await {
                    warn!(%peer, error = %e, "Failed to send auth_success");
                    return;
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "Failed to encode auth_success");
                return;
            }
        }
        info!(%peer, subject = %principal.subject, "Dashboard authenticated");

        let mut subscription = self.broadcaster.subscribe(&principal.subject);

        loop {
            tokio::select! {
                frame = subscription.frames.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = outbound.send(Message::Text(text.to_string())).await {
                            warn!(%peer, error = %e, "Dashboard send failed");
                            break;
                        }
                    }
                    None => break,
                },
                inbound_frame = inbound.next() => match inbound_frame {
                    Some(Ok(Message::Text(text))) => {
                        debug!(%peer, len = text.len(), "Dashboard message ignored");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%peer, error = %e, "Dashboard socket error");
                        break;
                    }
                },
            }
        }

        self.broadcaster.unsubscribe(subscription.id);
        info!(%peer, subject = %principal.subject, "Dashboard disconnected");
    }
}
