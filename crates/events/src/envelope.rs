use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of a push delivery: `{ "message": { "data": ..., "messageId": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,

    /// Fully-qualified subscription name, when the transport sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

impl PushRequest {
    pub fn new(message: PushMessage) -> Self {
        Self {
            message,
            subscription: None,
        }
    }
}

/// Transport-level message envelope.
///
/// Notes:
/// - `data` is the base64 encoding of an opaque byte string (normally UTF-8 JSON).
/// - `message_id` is transport-assigned and only used for logging/tracing; the
///   framework never deduplicates on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,

    #[serde(alias = "message_id")]
    pub message_id: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, alias = "publish_time", skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

impl PushMessage {
    pub fn new(message_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            message_id: message_id.into(),
            attributes: BTreeMap::new(),
            publish_time: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn into_request(self) -> PushRequest {
        PushRequest::new(self)
    }
}

/// A decoded delivery handed to a worker: the typed payload plus the
/// transport message id (for logs only).
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub message_id: String,
    pub data: T,
}

impl<T> Delivery<T> {
    pub fn new(message_id: impl Into<String>, data: T) -> Self {
        Self {
            message_id: message_id.into(),
            data,
        }
    }
}
