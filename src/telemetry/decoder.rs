//! Vehicle payload decoders.
//!
//! Decoding either yields a signal map or a [`DecodeError`] whose message is
//! sent back to the vehicle in the `error_ack` frame.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::TelemetryMap;
use crate::config::DecoderKind;

/// A raw WebSocket data frame.
#[derive(Debug, Clone, Copy)]
pub enum RawPayload<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("parse_error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse_error: expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Turns one raw frame into a signal map.
pub trait TelemetryDecoder: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn decode(&self, payload: RawPayload<'_>) -> Result<TelemetryMap, DecodeError>;
}

/// Strict JSON: text and binary frames must both hold a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl TelemetryDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, payload: RawPayload<'_>) -> Result<TelemetryMap, DecodeError> {
        match payload {
            RawPayload::Text(text) => parse_object(text.as_bytes()),
            RawPayload::Binary(bytes) => parse_object(bytes),
        }
    }
}

/// JSON where possible; non-JSON binary frames pass through hex-encoded.
///
/// Stands in for a manufacturer codec: the dashboard still sees every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueBinaryDecoder;

impl TelemetryDecoder for OpaqueBinaryDecoder {
    fn name(&self) -> &'static str {
        "opaque_binary"
    }

    fn decode(&self, payload: RawPayload<'_>) -> Result<TelemetryMap, DecodeError> {
        match payload {
            RawPayload::Text(text) => parse_object(text.as_bytes()),
            RawPayload::Binary(bytes) => Ok(parse_object(bytes).unwrap_or_else(|_| {
                let mut map = TelemetryMap::new();
                map.insert("rawData".into(), Value::String(hex::encode(bytes)));
                map.insert("format".into(), Value::String("opaque".into()));
                map
            })),
        }
    }
}

/// Decoder selected by `ingest.decoder`.
pub fn decoder_for(kind: DecoderKind) -> Arc<dyn TelemetryDecoder> {
    match kind {
        DecoderKind::Json => Arc::new(JsonDecoder),
        DecoderKind::OpaqueBinary => Arc::new(OpaqueBinaryDecoder),
    }
}

fn parse_object(bytes: &[u8]) -> Result<TelemetryMap, DecodeError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        Value::String(_) => Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}
