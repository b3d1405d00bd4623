//! HTTP push relay: delivers envelopes to `{endpoint}/{subscription}`.
//!
//! `2xx` is an acknowledgment. `5xx` and transport errors are retried
//! according to the `RetryPolicy`; any other status fails immediately.

use async_trait::async_trait;
use courier_events::{PushMessage, codec};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::{MessagePublisher, PublishError, RetryPolicy, TopicMap, new_message_id};

#[derive(Debug, Clone)]
pub struct PushRelayPublisher {
    http: reqwest::Client,
    endpoint: String,
    topics: TopicMap,
    retry: RetryPolicy,
}

enum Attempt {
    Delivered,
    Retryable(String),
    Rejected(String),
}

impl PushRelayPublisher {
    pub fn new(endpoint: impl Into<String>, topics: TopicMap) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            topics,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn attempt(&self, url: &str, message: &PushMessage) -> Attempt {
        let body = message.clone().into_request();
        match self.http.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => Attempt::Delivered,
            Ok(resp) if resp.status().is_server_error() => {
                Attempt::Retryable(format!("status {}", resp.status()))
            }
            Ok(resp) => Attempt::Rejected(format!("status {}", resp.status())),
            Err(e) => Attempt::Retryable(e.to_string()),
        }
    }

    async fn deliver(
        &self,
        topic: &str,
        subscription: &str,
        message: &PushMessage,
    ) -> Result<(), PublishError> {
        let url = format!("{}/{}", self.endpoint, subscription);
        let mut retries = 0;

        loop {
            let failure = match self.attempt(&url, message).await {
                Attempt::Delivered => {
                    debug!(topic, subscription, message_id = %message.message_id, "message delivered");
                    return Ok(());
                }
                Attempt::Rejected(reason) => reason,
                Attempt::Retryable(reason) if self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(
                        topic,
                        subscription,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "push delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Attempt::Retryable(reason) => reason,
            };

            return Err(PublishError::Delivery {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                message: failure,
            });
        }
    }
}

#[async_trait]
impl MessagePublisher for PushRelayPublisher {
    async fn publish(&self, topic: &str, payload: &JsonValue) -> Result<String, PublishError> {
        let id = new_message_id();
        let message = codec::encode(id.clone(), payload).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })?;

        let subscriptions = self.topics.subscriptions(topic);
        if subscriptions.is_empty() {
            debug!(topic, "no subscriptions for topic, message dropped");
        }
        for subscription in subscriptions {
            self.deliver(topic, subscription, &message).await?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Hits {
        calls: Arc<Mutex<Vec<(String, Bytes)>>>,
        fail_first: Arc<Mutex<u32>>,
    }

    async fn push(
        State(hits): State<Hits>,
        Path(name): Path<String>,
        body: Bytes,
    ) -> StatusCode {
        let rejected = name == "rejecting";
        hits.calls.lock().unwrap().push((name, body));
        if rejected {
            return StatusCode::BAD_REQUEST;
        }
        let mut remaining = hits.fail_first.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::NO_CONTENT
        }
    }

    async fn serve(hits: Hits) -> String {
        let router = Router::new().route("/push/:name", post(push)).with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/push")
    }

    fn topics() -> TopicMap {
        TopicMap::new().with("devcard-eligible", &["devcard-eligible-email", "devcard-eligible-analytics"])
    }

    #[tokio::test]
    async fn fans_out_to_every_subscription() {
        let hits = Hits::default();
        let publisher = PushRelayPublisher::new(serve(hits.clone()).await, topics());

        let id = publisher
            .publish("devcard-eligible", &serde_json::json!({ "userId": "u1" }))
            .await
            .unwrap();

        let calls = hits.calls.lock().unwrap().clone();
        let names: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["devcard-eligible-email", "devcard-eligible-analytics"]);

        let request = codec::decode_request(&calls[0].1).unwrap();
        assert_eq!(request.message.message_id, id);
        let payload = codec::decode_value(&request.message).unwrap();
        assert_eq!(payload, serde_json::json!({ "userId": "u1" }));
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let hits = Hits::default();
        *hits.fail_first.lock().unwrap() = 2;
        let publisher = PushRelayPublisher::new(
            serve(hits.clone()).await,
            TopicMap::new().with("t", &["s"]),
        )
        .with_retry(RetryPolicy::fixed(3, Duration::from_millis(5)));

        publisher.publish("t", &serde_json::json!({})).await.unwrap();
        assert_eq!(hits.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_policy_is_exhausted() {
        let hits = Hits::default();
        *hits.fail_first.lock().unwrap() = 10;
        let publisher = PushRelayPublisher::new(
            serve(hits.clone()).await,
            TopicMap::new().with("t", &["s"]),
        )
        .with_retry(RetryPolicy::fixed(1, Duration::from_millis(5)));

        let err = publisher.publish("t", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PublishError::Delivery { .. }));
        assert_eq!(hits.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn partial_fan_out_is_repeated_on_republish() {
        let hits = Hits::default();
        let publisher = PushRelayPublisher::new(
            serve(hits.clone()).await,
            TopicMap::new().with("t", &["accepting", "rejecting"]),
        )
        .with_retry(RetryPolicy::fixed(0, Duration::ZERO));

        for _ in 0..2 {
            let err = publisher.publish("t", &serde_json::json!({})).await.unwrap_err();
            assert!(matches!(err, PublishError::Delivery { ref subscription, .. } if subscription == "rejecting"));
        }

        let calls = hits.calls.lock().unwrap().clone();
        let names: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["accepting", "rejecting", "accepting", "rejecting"]);
    }
}
