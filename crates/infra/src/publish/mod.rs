//! Message publication.
//!
//! Handlers and the change relay publish JSON payloads to a topic. A
//! `TopicMap` says which subscriptions (and therefore which dispatch routes)
//! receive each topic.

mod in_memory;
mod loopback;
mod push_relay;
mod retry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub use in_memory::InMemoryPublisher;
pub use loopback::{LoopbackPublisher, LoopbackReceiver};
pub use push_relay::PushRelayPublisher;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode message for topic {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("delivery of topic {topic} to {subscription} failed: {message}")]
    Delivery {
        topic: String,
        subscription: String,
        message: String,
    },

    #[error("publisher is closed")]
    Closed,
}

/// Fan-out of a topic to its subscriptions.
///
/// Delivery is at-least-once per subscription. A publish that fails part way
/// through the fan-out returns an error, and subscriptions that already
/// received the message receive it again when the caller retries (for
/// example after the upstream message is redelivered). Subscribed handlers
/// must therefore be idempotent.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `payload` on `topic`. Returns the assigned message id.
    async fn publish(&self, topic: &str, payload: &JsonValue) -> Result<String, PublishError>;
}

/// New time-ordered message id.
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

/// Topic -> subscriptions fan-out table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMap {
    routes: BTreeMap<String, Vec<String>>,
}

impl TopicMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, topic: &str, subscriptions: &[&str]) -> Self {
        let subs = self.routes.entry(topic.to_string()).or_default();
        for s in subscriptions {
            if !subs.iter().any(|existing| existing == s) {
                subs.push(s.to_string());
            }
        }
        self
    }

    /// Subscriptions of `topic`; empty when nobody listens.
    pub fn subscriptions(&self, topic: &str) -> &[String] {
        self.routes.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_map_fans_out_without_duplicates() {
        let map = TopicMap::new()
            .with("devcard-eligible", &["devcard-eligible-email"])
            .with("devcard-eligible", &["devcard-eligible-analytics", "devcard-eligible-email"]);

        assert_eq!(
            map.subscriptions("devcard-eligible"),
            ["devcard-eligible-email", "devcard-eligible-analytics"]
        );
        assert!(map.subscriptions("nobody").is_empty());
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}
