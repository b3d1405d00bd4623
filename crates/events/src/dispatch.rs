//! Dispatcher: body bytes in, acknowledgement decision out.
//!
//! One call handles one delivery inside a `dispatch` span carrying the
//! route name and the transport message id. Every failure produces exactly
//! one `error` record, whether it is acknowledged or redelivered.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{Instrument, debug, error, field, info_span};

use crate::codec::{self, DecodeError};
use crate::policy::{Disposition, DispatchState, FailureKind};
use crate::registry::{Registry, RegistryError, Route};
use crate::worker::{CronJob, ErasedWorker, WorkerContext, WorkerError};

/// Result of dispatching one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub route: String,
    pub message_id: Option<String>,
    pub state: DispatchState,
    pub failure: Option<FailureKind>,
}

impl DispatchReport {
    fn acknowledged(route: &str, message_id: Option<String>) -> Self {
        Self {
            route: route.to_string(),
            message_id,
            state: DispatchState::Acknowledged,
            failure: None,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.state {
            DispatchState::RedeliverRequested => Disposition::Redeliver,
            _ => Disposition::Acknowledge,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.disposition() == Disposition::Acknowledge
    }
}

pub struct Dispatcher<C> {
    registry: Arc<Registry<C>>,
    ctx: Arc<C>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<C: WorkerContext> Dispatcher<C> {
    pub fn new(registry: Arc<Registry<C>>, ctx: Arc<C>) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    /// Look up `name` and dispatch `body` to it.
    pub async fn dispatch(&self, name: &str, body: &[u8]) -> Result<DispatchReport, RegistryError> {
        match self.registry.route(name) {
            Some(Route::Worker(w)) => Ok(self.deliver(w.as_ref(), body).await),
            Some(Route::Cron(c)) => Ok(self.trigger(c.as_ref(), body).await),
            None => Err(RegistryError::Unknown(name.to_string())),
        }
    }

    /// Decode a push request and run the worker on its payload.
    pub async fn deliver(&self, worker: &dyn ErasedWorker<C>, body: &[u8]) -> DispatchReport {
        let name = worker.subscription();
        let span = info_span!("dispatch", subscription = name, message_id = field::Empty);

        async move {
            let request = match codec::decode_request(body) {
                Ok(r) => r,
                Err(e) => return self.fail(name, None, None, e.into()),
            };
            let message_id = request.message.message_id.clone();
            tracing::Span::current().record("message_id", message_id.as_str());

            let data = match codec::decode_value(&request.message) {
                Ok(v) => v,
                Err(e) => {
                    let raw = JsonValue::String(request.message.data);
                    return self.fail(name, Some(message_id), Some(&raw), e.into());
                }
            };

            match worker
                .handle_value(&message_id, data.clone(), self.ctx.as_ref())
                .await
            {
                Ok(()) => {
                    debug!("message handled");
                    DispatchReport::acknowledged(name, Some(message_id))
                }
                Err(e) => self.fail(name, Some(message_id), Some(&data), e),
            }
        }
        .instrument(span)
        .await
    }

    /// Run a cron job. An empty body means no input.
    pub async fn trigger(&self, job: &dyn CronJob<C>, body: &[u8]) -> DispatchReport {
        let name = job.name();
        let span = info_span!("cron", cron = name);

        async move {
            let input = match parse_cron_input(body) {
                Ok(v) => v,
                Err(e) => return self.fail(name, None, None, e.into()),
            };

            match job.run(input.clone(), self.ctx.as_ref()).await {
                Ok(()) => {
                    debug!("cron finished");
                    DispatchReport::acknowledged(name, None)
                }
                Err(e) => self.fail(name, None, input.as_ref(), e),
            }
        }
        .instrument(span)
        .await
    }

    fn fail(
        &self,
        route: &str,
        message_id: Option<String>,
        data: Option<&JsonValue>,
        err: WorkerError,
    ) -> DispatchReport {
        let kind = FailureKind::classify(&err, self.ctx.write_errors());
        let data = data.map(|d| d.to_string()).unwrap_or_default();

        match kind.disposition() {
            Disposition::Acknowledge => error!(
                route,
                failure = kind.as_str(),
                data = %data,
                error = %err,
                "dropping message after permanent failure"
            ),
            Disposition::Redeliver => error!(
                route,
                failure = kind.as_str(),
                data = %data,
                error = %err,
                "handler failed, requesting redelivery"
            ),
        }

        DispatchReport {
            route: route.to_string(),
            message_id,
            state: DispatchState::settle(kind.disposition()),
            failure: Some(kind),
        }
    }
}

fn parse_cron_input(body: &[u8]) -> Result<Option<JsonValue>, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: JsonValue = serde_json::from_slice(body).map_err(DecodeError::Payload)?;
    Ok(if value.is_null() { None } else { Some(value) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Delivery;
    use crate::worker::{Worker, boxed_cron, boxed_worker};
    use async_trait::async_trait;
    use courier_core::{ClassifyWriteError, IntegrityKind, StoreError};
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct Rules;
    impl ClassifyWriteError for Rules {}

    #[derive(Default)]
    struct Ctx {
        seen: Mutex<Vec<String>>,
    }

    impl WorkerContext for Ctx {
        fn write_errors(&self) -> &dyn ClassifyWriteError {
            &Rules
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Ping {
        user_id: String,
        #[serde(default)]
        fail: Option<String>,
    }

    struct PingWorker;

    #[async_trait]
    impl Worker<Ctx> for PingWorker {
        type Payload = Ping;

        fn subscription(&self) -> &'static str {
            "ping"
        }

        async fn handle(&self, delivery: Delivery<Ping>, ctx: &Ctx) -> Result<(), WorkerError> {
            match delivery.data.fail.as_deref() {
                Some("integrity") => Err(StoreError::integrity(IntegrityKind::Unique, "dup").into()),
                Some("transient") => Err(StoreError::unavailable("connection reset").into()),
                Some(other) => Err(anyhow::anyhow!("unexpected: {other}").into()),
                None => {
                    ctx.seen.lock().unwrap().push(delivery.data.user_id);
                    Ok(())
                }
            }
        }
    }

    struct Tick;

    #[async_trait]
    impl CronJob<Ctx> for Tick {
        fn name(&self) -> &'static str {
            "tick"
        }

        async fn run(&self, input: Option<JsonValue>, ctx: &Ctx) -> Result<(), WorkerError> {
            let label = input
                .and_then(|v| v.get("label").and_then(|l| l.as_str()).map(str::to_string))
                .unwrap_or_else(|| "tick".to_string());
            ctx.seen.lock().unwrap().push(label);
            Ok(())
        }
    }

    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn dispatcher() -> Dispatcher<Ctx> {
        let registry =
            Registry::new(vec![boxed_worker(PingWorker)], vec![boxed_cron(Tick)]).unwrap();
        Dispatcher::new(Arc::new(registry), Arc::new(Ctx::default()))
    }

    fn body(payload: JsonValue) -> Vec<u8> {
        let msg = codec::encode("m-1", &payload).unwrap();
        serde_json::to_vec(&msg.into_request()).unwrap()
    }

    fn counting() -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(count.clone()));
        (count, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn handled_message_is_acknowledged() {
        let d = dispatcher();
        let report = d
            .dispatch("ping", &body(serde_json::json!({ "userId": "u1" })))
            .await
            .unwrap();

        assert_eq!(report.state, DispatchState::Acknowledged);
        assert_eq!(report.message_id.as_deref(), Some("m-1"));
        assert!(report.failure.is_none());
        assert_eq!(*d.context().seen.lock().unwrap(), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn malformed_envelope_is_acknowledged_and_logged_once() {
        let (errors, _guard) = counting();
        let d = dispatcher();

        let report = d.dispatch("ping", b"definitely not json").await.unwrap();

        assert!(report.is_acknowledged());
        assert_eq!(report.failure, Some(FailureKind::Decode));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(d.context().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_json_payload_is_acknowledged() {
        let (errors, _guard) = counting();
        let d = dispatcher();
        let msg = codec::encode_bytes("m-2", b"<html>");
        let raw = serde_json::to_vec(&msg.into_request()).unwrap();

        let report = d.dispatch("ping", &raw).await.unwrap();

        assert_eq!(report.failure, Some(FailureKind::Decode));
        assert!(report.is_acknowledged());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shape_mismatch_is_a_decode_failure() {
        let d = dispatcher();
        let report = d
            .dispatch("ping", &body(serde_json::json!({ "nope": true })))
            .await
            .unwrap();
        assert_eq!(report.failure, Some(FailureKind::Decode));
        assert!(report.is_acknowledged());
    }

    #[tokio::test]
    async fn integrity_violation_is_acknowledged_and_logged_once() {
        let (errors, _guard) = counting();
        let d = dispatcher();

        let report = d
            .dispatch("ping", &body(serde_json::json!({ "userId": "u1", "fail": "integrity" })))
            .await
            .unwrap();

        assert_eq!(report.state, DispatchState::Acknowledged);
        assert_eq!(report.failure, Some(FailureKind::IntegrityViolation));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_and_unknown_failures_request_redelivery() {
        let (errors, _guard) = counting();
        let d = dispatcher();

        for fail in ["transient", "weird"] {
            let report = d
                .dispatch("ping", &body(serde_json::json!({ "userId": "u1", "fail": fail })))
                .await
                .unwrap();
            assert_eq!(report.state, DispatchState::RedeliverRequested);
            assert_eq!(report.disposition(), Disposition::Redeliver);
        }
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cron_runs_with_and_without_input() {
        let d = dispatcher();

        assert!(d.dispatch("tick", b"").await.unwrap().is_acknowledged());
        assert!(
            d.dispatch("tick", br#"{"label":"custom"}"#)
                .await
                .unwrap()
                .is_acknowledged()
        );
        assert_eq!(
            *d.context().seen.lock().unwrap(),
            vec!["tick".to_string(), "custom".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_route_is_reported() {
        let d = dispatcher();
        let err = d.dispatch("nope", b"{}").await.unwrap_err();
        assert_eq!(err, RegistryError::Unknown("nope".into()));
    }
}
