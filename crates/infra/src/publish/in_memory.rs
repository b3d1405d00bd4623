use std::sync::Mutex;

use async_trait::async_trait;
use courier_events::{PushMessage, codec};
use serde_json::Value as JsonValue;

use super::{MessagePublisher, PublishError, new_message_id};

/// Publisher that records every message.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    published: Mutex<Vec<(String, PushMessage)>>,
    failing: Mutex<bool>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every publish fails.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    pub fn published(&self) -> Vec<(String, PushMessage)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Decoded payloads published on `topic`, in publish order.
    pub fn payloads(&self, topic: &str) -> Vec<JsonValue> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, m)| codec::decode_value(&m).ok())
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.published.lock() {
            p.clear();
        }
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: &JsonValue) -> Result<String, PublishError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(PublishError::Closed);
        }
        let id = new_message_id();
        let message = codec::encode(id.clone(), payload).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })?;
        self.published
            .lock()
            .map_err(|_| PublishError::Closed)?
            .push((topic.to_string(), message));
        Ok(id)
    }
}
