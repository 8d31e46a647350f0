use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::protocol::kinds::InboundKind;
use crate::utils::{current_datetime_rfc9557, string_field};

/// A single frame on the socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// The type tag, e.g. `message:new` or `presence:subscribe`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    /// Set by the client on outbound messages that expect an acknowledgment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WireMessage {
    /// Builds a frame stamped with the current time.
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            error: None,
            timestamp: current_datetime_rfc9557(),
            correlation_id: None,
        }
    }

    /// Builds a locally generated event (connection status, dead letters).
    pub fn local(kind: &str, data: Value) -> Self {
        Self::new(kind, Some(data))
    }

    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the frame for sending.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The typed view of the `type` tag.
    pub fn inbound_kind(&self) -> InboundKind {
        InboundKind::from(self.kind.as_str())
    }

    /// The correlation id echoed by the server: the envelope field first, then
    /// `data.correlationId`, then `data.tempId`.
    pub fn echoed_correlation_id(&self) -> Option<String> {
        if let Some(id) = &self.correlation_id {
            return Some(id.clone());
        }
        let data = self.data.as_ref()?;
        string_field(data, "correlationId").or_else(|| string_field(data, "tempId"))
    }

    /// Reads a string (or numeric) field from `data`.
    pub fn data_str(&self, key: &str) -> Option<String> {
        self.data.as_ref().and_then(|d| string_field(d, key))
    }
}
