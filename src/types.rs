//! Core types for the message store client.

use crate::error::{MessageDbError, Result};
use crate::stream_name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Structured message payload: a JSON object.
///
/// Values are tagged (`string`, `number`, `bool`, `null`, `array`, `object`)
/// through [`serde_json::Value`].
pub type Payload = Map<String, Value>;

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single message, either about to be written or read back from the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier. Assigned on write when absent.
    pub id: Option<Uuid>,

    /// Entity stream (`category-id`) or category stream name.
    pub stream_name: String,

    /// Discriminator used for subscription dispatch.
    pub message_type: String,

    pub data: Payload,

    pub metadata: Payload,

    /// Reject the write unless the stream's last position equals this.
    pub expected_version: Option<i64>,

    /// 0-based position within the message's own stream (assigned by store).
    pub position: i64,

    /// Position across the whole store (assigned by store).
    pub global_position: i64,

    /// Write time (assigned by store).
    pub time: Timestamp,
}

impl Message {
    /// Create a new message with a freshly generated id.
    pub fn new(stream_name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            stream_name: stream_name.into(),
            message_type: message_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_expected_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Category this message's stream belongs to.
    pub fn category(&self) -> &str {
        stream_name::category(&self.stream_name)
    }

    /// Entity id part of the stream name, if it is an entity stream.
    pub fn entity_id(&self) -> Option<&str> {
        stream_name::entity_id(&self.stream_name)
    }

    /// Position to resume reading after this message: global for category
    /// reads, stream-local otherwise.
    pub(crate) fn read_cursor(&self, by_category: bool) -> i64 {
        if by_category {
            self.global_position
        } else {
            self.position
        }
    }
}

/// Row shape returned by the store's read primitives.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRow {
    pub id: Uuid,
    pub stream_name: String,
    pub message_type: String,
    pub position: i64,
    pub global_position: i64,
    /// Serialized data, `None` when the message was written without any.
    pub data: Option<String>,
    pub metadata: Option<String>,
    pub time: Timestamp,
}

impl TryFrom<MessageRow> for Message {
    type Error = MessageDbError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: Some(row.id),
            data: decode_payload(row.data.as_deref())?,
            metadata: decode_payload(row.metadata.as_deref())?,
            stream_name: row.stream_name,
            message_type: row.message_type,
            expected_version: None,
            position: row.position,
            global_position: row.global_position,
            time: row.time,
        })
    }
}

/// Serialize a payload for the store. Empty payloads serialize to nothing.
pub fn encode_payload(payload: &Payload) -> Result<Option<String>> {
    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(payload)?))
}

/// Deserialize a stored payload. Missing, empty and `null` payloads yield an
/// empty mapping.
pub fn decode_payload(raw: Option<&str>) -> Result<Payload> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(Payload::new()),
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Payload::new()),
        Ok(other) => Err(MessageDbError::Deserialization(format!(
            "expected a JSON object payload, got {other}"
        ))),
        Err(e) => Err(MessageDbError::Deserialization(e.to_string())),
    }
}
