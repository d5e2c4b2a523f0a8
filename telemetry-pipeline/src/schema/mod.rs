//! Queue message format.
//!
//! Every body the intake service produces is a JSON object tagged with an
//! integer `schemaVersion`. Version 2 is the current shape; version 1 is the
//! level-only shape older producers emitted. Decoding dispatches on the tag and
//! never guesses the version from which keys happen to be present.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::PipelineError;

pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageVersion {
    /// `{deviceId, timestamp, level}`
    V1 = 1,
    /// `{deviceCode, time, Level, Flow, Energy}`
    V2 = 2,
}

impl MessageVersion {
    pub const CURRENT: MessageVersion = MessageVersion::V2;
}

impl TryFrom<u8> for MessageVersion {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(MessageVersion::V1),
            2 => Ok(MessageVersion::V2),
            other => Err(format!("unsupported schema version {other}")),
        }
    }
}

impl From<MessageVersion> for u8 {
    fn from(v: MessageVersion) -> Self {
        v as u8
    }
}

/// Version 2 field set, with keys cased as devices send them.
///
/// Values are kept as raw JSON so the intake can pass them through untouched;
/// a `null` or missing key deserializes to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingFields {
    #[serde(rename = "deviceCode")]
    pub device_code: Option<Value>,
    pub time: Option<Value>,
    #[serde(rename = "Level")]
    pub level: Option<Value>,
    #[serde(rename = "Flow")]
    pub flow: Option<Value>,
    #[serde(rename = "Energy")]
    pub energy: Option<Value>,
}

/// Version 1 field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyFields {
    #[serde(rename = "deviceId")]
    pub device_id: Option<Value>,
    pub timestamp: Option<Value>,
    pub level: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    V1(LegacyFields),
    V2(ReadingFields),
}

impl DecodedMessage {
    pub fn version(&self) -> MessageVersion {
        match self {
            DecodedMessage::V1(_) => MessageVersion::V1,
            DecodedMessage::V2(_) => MessageVersion::V2,
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    #[serde(rename = "schemaVersion")]
    schema_version: MessageVersion,
    #[serde(flatten)]
    fields: &'a T,
}

/// Serialize a reading into the canonical (current version) queue body.
pub fn encode(fields: &ReadingFields) -> Result<String, PipelineError> {
    serde_json::to_string(&Tagged {
        schema_version: MessageVersion::CURRENT,
        fields,
    })
    .map_err(|e| PipelineError::InvalidPayload(format!("cannot serialize reading: {e}")))
}

/// Parse a queue body and pick the decoder matching its version tag.
///
/// Bodies without a tag are decoded as `untagged`; with `None` they are
/// rejected.
pub fn decode(body: &str, untagged: Option<MessageVersion>) -> Result<DecodedMessage, PipelineError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::MalformedMessage(format!("body is not JSON: {e}")))?;

    let Value::Object(mut fields) = value else {
        return Err(PipelineError::MalformedMessage(
            "body is not a JSON object".to_string(),
        ));
    };

    let version = match fields.remove(SCHEMA_VERSION_FIELD) {
        Some(tag) => version_from_tag(&tag)?,
        None => untagged.ok_or_else(|| {
            PipelineError::MalformedMessage(format!("message has no {SCHEMA_VERSION_FIELD}"))
        })?,
    };

    match version {
        MessageVersion::V1 => decode_fields(fields).map(DecodedMessage::V1),
        MessageVersion::V2 => decode_fields(fields).map(DecodedMessage::V2),
    }
}

fn version_from_tag(tag: &Value) -> Result<MessageVersion, PipelineError> {
    let raw = tag
        .as_u64()
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| {
            PipelineError::MalformedMessage(format!("{SCHEMA_VERSION_FIELD} must be a small integer, got {tag}"))
        })?;

    MessageVersion::try_from(raw).map_err(PipelineError::MalformedMessage)
}

fn decode_fields<T: serde::de::DeserializeOwned>(fields: Map<String, Value>) -> Result<T, PipelineError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| PipelineError::MalformedMessage(format!("unexpected field layout: {e}")))
}
