//! Telemetry wire types shared by the vehicle and dashboard channels.
//!
//! ## Frames
//!
//! - [`VehicleReply`]: `ack` / `error_ack`, exactly one per inbound vehicle message
//! - [`DashboardFrame`]: `auth_success` and the `telemetry` broadcast envelope
//!
//! Decoding of vehicle payloads sits behind [`TelemetryDecoder`] so a real
//! wire-format codec can replace the JSON decoder without touching ingestion.

pub mod decoder;

pub use decoder::{decoder_for, DecodeError, JsonDecoder, OpaqueBinaryDecoder, RawPayload, TelemetryDecoder};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded signal name → value mapping.
pub type TelemetryMap = serde_json::Map<String, Value>;

/// Correlation id echoed back in acknowledgments.
///
/// Vehicles may send either strings or numbers; both are echoed unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Text(String),
    Number(serde_json::Number),
}

impl MessageId {
    /// Explicit id carried by the payload (`messageId`, then `id`).
    pub fn from_payload(data: &TelemetryMap) -> Option<Self> {
        ["messageId", "id"]
            .iter()
            .filter_map(|key| data.get(*key))
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
                Value::Number(n) => Some(Self::Number(n.clone())),
                _ => None,
            })
    }

    /// Synthesized id: the arrival time in epoch milliseconds.
    pub fn generated(received_at: DateTime<Utc>) -> Self {
        Self::Number(received_at.timestamp_millis().into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Text(s) => write!(f, "{s}"),
            MessageId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// One decoded vehicle message. Lives only for one forward-and-broadcast cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub message_id: MessageId,
    /// Whether `message_id` came from the payload rather than being synthesized.
    pub explicit_id: bool,
    pub data: TelemetryMap,
    pub received_at: DateTime<Utc>,
}

impl TelemetryMessage {
    pub fn new(data: TelemetryMap, received_at: DateTime<Utc>) -> Self {
        let (message_id, explicit_id) = match MessageId::from_payload(&data) {
            Some(id) => (id, true),
            None => (MessageId::generated(received_at), false),
        };
        Self {
            message_id,
            explicit_id,
            data,
            received_at,
        }
    }
}

/// Acknowledgment sent back to a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "messageType")]
pub enum VehicleReply {
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "messageId")]
        message_id: MessageId,
        #[serde(rename = "receivedTimestamp")]
        received_timestamp: i64,
    },
    #[serde(rename = "error_ack")]
    Nack {
        error: String,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl VehicleReply {
    pub fn ack(message: &TelemetryMessage, received_at: DateTime<Utc>) -> Self {
        Self::Ack {
            message_id: message.message_id.clone(),
            received_timestamp: received_at.timestamp_millis(),
        }
    }

    pub fn nack(error: &DecodeError, received_at: DateTime<Utc>) -> Self {
        Self::Nack {
            error: error.to_string(),
            message_id: MessageId::generated(received_at),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent to dashboard clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardFrame<'a> {
    AuthSuccess {
        message: &'a str,
    },
    Telemetry {
        vin: &'a str,
        timestamp: i64,
        data: &'a TelemetryMap,
    },
}

impl DashboardFrame<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
