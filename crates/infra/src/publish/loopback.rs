//! In-process delivery: published messages are dispatched straight back
//! into the local dispatcher, with the same ack/redeliver contract a push
//! transport would apply.

use std::sync::Arc;

use async_trait::async_trait;
use courier_events::{Dispatcher, PushMessage, WorkerContext, codec};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::{MessagePublisher, PublishError, RetryPolicy, TopicMap, new_message_id};

const CHANNEL_CAPACITY: usize = 1024;

struct Outbound {
    subscription: String,
    message: PushMessage,
}

#[derive(Debug, Clone)]
pub struct LoopbackPublisher {
    topics: TopicMap,
    tx: mpsc::Sender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("subscription", &self.subscription)
            .field("message_id", &self.message.message_id)
            .finish()
    }
}

/// Receiving half; drive it with `run`.
pub struct LoopbackReceiver {
    rx: mpsc::Receiver<Outbound>,
}

impl LoopbackPublisher {
    pub fn new(topics: TopicMap) -> (Self, LoopbackReceiver) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { topics, tx }, LoopbackReceiver { rx })
    }
}

#[async_trait]
impl MessagePublisher for LoopbackPublisher {
    async fn publish(&self, topic: &str, payload: &JsonValue) -> Result<String, PublishError> {
        let id = new_message_id();
        let message = codec::encode(id.clone(), payload).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })?;

        for subscription in self.topics.subscriptions(topic) {
            self.tx
                .send(Outbound {
                    subscription: subscription.clone(),
                    message: message.clone(),
                })
                .await
                .map_err(|_| PublishError::Closed)?;
        }
        Ok(id)
    }
}

impl LoopbackReceiver {
    /// Dispatch every queued message until all publishers are dropped.
    ///
    /// Each message is handled on its own task; a redelivery request is
    /// retried according to `retry`, then dropped with an error record.
    pub async fn run<C: WorkerContext>(mut self, dispatcher: Dispatcher<C>, retry: RetryPolicy) {
        let retry = Arc::new(retry);
        while let Some(outbound) = self.rx.recv().await {
            let dispatcher = dispatcher.clone();
            let retry = retry.clone();
            tokio::spawn(async move { deliver(dispatcher, &retry, outbound).await });
        }
        debug!("loopback publisher closed");
    }
}

async fn deliver<C: WorkerContext>(dispatcher: Dispatcher<C>, retry: &RetryPolicy, outbound: Outbound) {
    let body = match serde_json::to_vec(&outbound.message.clone().into_request()) {
        Ok(b) => b,
        Err(e) => {
            error!(subscription = %outbound.subscription, error = %e, "failed to encode loopback message");
            return;
        }
    };

    let mut retries = 0;
    loop {
        match dispatcher.dispatch(&outbound.subscription, &body).await {
            Ok(report) if report.is_acknowledged() => return,
            Ok(_) if retry.should_retry(retries) => {
                retries += 1;
                tokio::time::sleep(retry.delay_for_attempt(retries)).await;
            }
            Ok(_) => {
                warn!(
                    subscription = %outbound.subscription,
                    message_id = %outbound.message.message_id,
                    attempts = retries + 1,
                    "loopback delivery exhausted retries, dropping message"
                );
                return;
            }
            Err(e) => {
                error!(error = %e, message_id = %outbound.message.message_id, "loopback delivery has no route");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::ClassifyWriteError;
    use courier_events::{Delivery, Registry, Worker, WorkerError, boxed_worker};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Rules;
    impl ClassifyWriteError for Rules {}

    #[derive(Default)]
    struct Ctx {
        seen: Mutex<Vec<JsonValue>>,
        failures_left: AtomicU32,
    }

    impl WorkerContext for Ctx {
        fn write_errors(&self) -> &dyn ClassifyWriteError {
            &Rules
        }
    }

    struct Sink;

    #[async_trait]
    impl Worker<Ctx> for Sink {
        type Payload = JsonValue;

        fn subscription(&self) -> &'static str {
            "sink"
        }

        async fn handle(&self, delivery: Delivery<JsonValue>, ctx: &Ctx) -> Result<(), WorkerError> {
            if ctx.failures_left.load(Ordering::SeqCst) > 0 {
                ctx.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkerError::transient("not yet"));
            }
            ctx.seen.lock().unwrap().push(delivery.data);
            Ok(())
        }
    }

    #[tokio::test]
    async fn published_messages_reach_the_dispatcher() {
        let ctx = Arc::new(Ctx::default());
        ctx.failures_left.store(1, Ordering::SeqCst);
        let registry = Arc::new(Registry::new(vec![boxed_worker(Sink)], vec![]).unwrap());
        let dispatcher = Dispatcher::new(registry, ctx.clone());

        let (publisher, receiver) = LoopbackPublisher::new(TopicMap::new().with("t", &["sink"]));
        let task = tokio::spawn(receiver.run(
            dispatcher,
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        ));

        publisher
            .publish("t", &serde_json::json!({ "n": 1 }))
            .await
            .unwrap();
        drop(publisher);
        task.await.unwrap();

        for _ in 0..100 {
            if !ctx.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*ctx.seen.lock().unwrap(), vec![serde_json::json!({ "n": 1 })]);
    }
}
