//! Control message envelope
//!
//! Clients exchange JSON objects of the form `{"type": <string>, ...}`.
//! The relay does not interpret type-specific fields; it stamps the
//! sender's assigned name into the object and forwards it verbatim. The
//! relay-originated messages (handshake acks, video frames) are also
//! built here so every wire shape lives in one place.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// Field the relay stamps onto every routed message
const SENDER_FIELD: &str = "sender";

/// A parsed control message
///
/// Backed by a JSON object map so unknown fields pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    fields: Map<String, Value>,
}

impl ControlMessage {
    /// Parse a raw payload as a control message
    ///
    /// Anything other than a JSON object is rejected.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(RelayError::Envelope(serde::de::Error::custom(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))),
        }
    }

    /// The `type` field, if present and a string
    pub fn message_type(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    /// Look up an arbitrary field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Stamp the sender's name, overwriting any client-supplied value
    pub fn stamp_sender(&mut self, sender: &str) {
        self.fields
            .insert(SENDER_FIELD.to_string(), Value::String(sender.to_string()));
    }

    /// Serialize back to wire bytes
    pub fn to_bytes(&self) -> Bytes {
        // A Map of valid Values cannot fail to serialize
        Bytes::from(serde_json::to_vec(&self.fields).unwrap_or_default())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Seconds since the Unix epoch as a float, matching the wire format
/// peers already expect
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    msg: &'a str,
    timestamp: f64,
}

/// Build a relay-originated status message
pub fn status_message(msg: &str) -> Bytes {
    let message = StatusMessage {
        kind: "status",
        msg,
        timestamp: unix_timestamp(),
    };
    Bytes::from(serde_json::to_vec(&message).unwrap_or_default())
}

#[derive(Serialize)]
struct VideoWelcome {
    status: &'static str,
    message: &'static str,
    timestamp: f64,
}

/// Build the one-time welcome sent to a new video subscriber
pub fn video_welcome() -> Bytes {
    let message = VideoWelcome {
        status: "connected",
        message: "Video stream connected",
        timestamp: unix_timestamp(),
    };
    Bytes::from(serde_json::to_vec(&message).unwrap_or_default())
}

#[derive(Serialize)]
struct VideoFrameMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a str,
    frame_num: u32,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    test: Option<bool>,
}

/// Wrap an encoded JPEG into the video frame delivery message
pub fn video_frame_message(jpeg: &[u8], frame_num: u32, test: bool) -> Bytes {
    let data = BASE64.encode(jpeg);
    let message = VideoFrameMessage {
        kind: "video_frame",
        data: &data,
        frame_num,
        timestamp: unix_timestamp(),
        test: test.then_some(true),
    };
    Bytes::from(serde_json::to_vec(&message).unwrap_or_default())
}
