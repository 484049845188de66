//! Vehicle ingestion channel.
//!
//! One [`VehicleSession`] per verified vehicle socket. For every data frame the
//! session sends exactly one reply (`ack` or `error_ack`), in arrival order, and
//! forwards successfully decoded messages to the [`TelemetryForwarder`] after
//! the ack has been written. A decode failure never closes the socket.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::stats::GatewayStats;
use crate::telemetry::{RawPayload, TelemetryDecoder, TelemetryMessage, VehicleReply};
use crate::tls::PeerIdentity;

/// Downstream consumer of decoded vehicle telemetry.
pub trait TelemetryForwarder: Send + Sync {
    /// Hand one decoded message on. Must not block the vehicle session.
    fn forward(&self, vin: &str, message: &TelemetryMessage);
}

/// Counts reported when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub acked: u64,
    pub rejected: u64,
}

pub struct VehicleSession {
    identity: PeerIdentity,
    decoder: Arc<dyn TelemetryDecoder>,
    forwarder: Arc<dyn TelemetryForwarder>,
    stats: Arc<GatewayStats>,
}

impl VehicleSession {
    pub fn new(
        identity: PeerIdentity,
        decoder: Arc<dyn TelemetryDecoder>,
        forwarder: Arc<dyn TelemetryForwarder>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            identity,
            decoder,
            forwarder,
            stats,
        }
    }

    /// Decode one frame and build its reply.
    ///
    /// Returns the decoded message alongside an ack, or `None` alongside a nack.
    pub fn handle(
        &self,
        payload: RawPayload<'_>,
        received_at: DateTime<Utc>,
    ) -> (VehicleReply, Option<TelemetryMessage>) {
        match self.decoder.decode(payload) {
            Ok(data) => {
                let message = TelemetryMessage::new(data, received_at);
                (VehicleReply::ack(&message, received_at), Some(message))
            }
            Err(e) => {
                warn!(vin = %self.identity.id(), decoder = self.decoder.name(), error = %e, "Failed to decode vehicle message");
                (VehicleReply::nack(&e, received_at), None)
            }
        }
    }

    /// Drive the session until the vehicle closes or the socket fails.
    pub async fn run<S, K, E>(self, mut inbound: S, mut outbound: K) -> SessionSummary
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        let vin = self.identity.id();
        let connected_at = Instant::now();
        info!(vin = %vin, peer = %self.identity.remote_addr, "Vehicle connected");
        self.stats.vehicle_connected();

        let mut summary = SessionSummary::default();

        while let Some(next) = inbound.next().await {
            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(vin = %vin, error = %e, "Vehicle socket error");
                    break;
                }
            };
            let received_at = Utc::now();

            let payload = match &frame {
                Message::Text(text) => RawPayload::Text(text),
                Message::Binary(bytes) => RawPayload::Binary(bytes),
                Message::Close(close) => {
                    let code = close.as_ref().map(|c| c.code);
                    info!(vin = %vin, ?code, "Vehicle closed connection");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let (reply, decoded) = self.handle(payload, received_at);

            let text = match reply.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(vin = %vin, error = %e, "Failed to encode vehicle reply");
                    continue;
                }
            };
            if let Err(e) = outbound.send(Message::Text(text)).await {
                // Peer went away mid-reply; nothing left to acknowledge.
                warn!(vin = %vin, error = %e, "Failed to send vehicle reply");
                break;
            }

            // Count only replies that reached the socket.
            if reply.is_ack() {
                summary.acked += 1;
                self.stats.record_ack();
            } else {
                summary.rejected += 1;
                self.stats.record_nack();
            }

            if let Some(message) = decoded {
                debug!(vin = %vin, message_id = %message.message_id, signals = message.data.len(), "Telemetry acknowledged");
                self.forwarder.forward(&vin, &message);
            }
        }

        self.stats.vehicle_disconnected();
        info!(
            vin = %vin,
            acked = summary.acked,
            rejected = summary.rejected,
            connected_secs = connected_at.elapsed().as_secs(),
            "Vehicle disconnected"
        );
        summary
    }
}
