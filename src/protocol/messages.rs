//! Wire format of the command protocol.
//!
//! Every payload travels under the [`ENVELOPE_KEY`] of an opaque transport
//! message. Anything without that key belongs to someone else.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::clock::LogicalMs;
use crate::error::WireError;
use crate::transport::PeerId;

pub const ENVELOPE_KEY: &str = "hotpod";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    #[serde(rename = "REC_START")]
    Start,
    #[serde(rename = "REC_STOP")]
    Stop,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Start => "REC_START",
            CommandType::Stop => "REC_STOP",
        }
    }
}

/// A recording command issued by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub seq: u64,
    #[serde(deserialize_with = "logical_ts")]
    pub ts: LogicalMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<PeerId>,
}

impl Command {
    /// Issuer of the command; a missing `hostId` means the sender.
    pub fn issuer(&self, sender: &PeerId) -> PeerId {
        self.host_id.clone().unwrap_or_else(|| sender.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ControlMessage {
    SyncRequest {
        #[serde(rename = "lastEventId")]
        last_event_id: u64,
    },
    SyncResponse {
        #[serde(rename = "hostId")]
        host_id: PeerId,
        events: Vec<Command>,
    },
    HostInfo {
        #[serde(rename = "hostId")]
        host_id: PeerId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Control(ControlMessage),
    Command(Command),
}

pub fn encode(message: &WireMessage) -> Result<Value, serde_json::Error> {
    let mut envelope = Map::new();
    envelope.insert(ENVELOPE_KEY.to_string(), serde_json::to_value(message)?);
    Ok(Value::Object(envelope))
}

pub fn decode(payload: &Value) -> Result<WireMessage, WireError> {
    let inner = payload.get(ENVELOPE_KEY).ok_or(WireError::NoEnvelope)?;
    Ok(WireMessage::deserialize(inner)?)
}

/// JavaScript peers may send fractional milliseconds.
/// Largest integer a JSON number carries exactly across all peers.
pub const MAX_WIRE_TS: LogicalMs = (1 << 53) - 1;

fn logical_ts<'de, D>(deserializer: D) -> Result<LogicalMs, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }

    let ms = match Number::deserialize(deserializer)? {
        Number::Int(ms) => ms,
        Number::Float(ms) if ms.is_finite() && ms.abs() <= MAX_WIRE_TS as f64 => {
            ms.round() as LogicalMs
        }
        Number::Float(_) => return Err(serde::de::Error::custom("timestamp out of range")),
    };
    if !(-MAX_WIRE_TS..=MAX_WIRE_TS).contains(&ms) {
        return Err(serde::de::Error::custom("timestamp out of range"));
    }
    Ok(ms)
}
