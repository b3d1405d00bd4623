//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: collaborators (store, integrations, publisher) and the
//!   dispatcher built from configuration
//! - `routes/`: one `POST /{name}` route per registered worker or cron, plus
//!   `/health`
//! - `errors.rs`: consistent error responses

use axum::{Router, routing::get};
use courier_events::Dispatcher;
use courier_workers::WorkerCtx;

pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(dispatcher: Dispatcher<WorkerCtx>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use courier_events::codec;
    use courier_infra::integrations::{LogAnalytics, LogMailer, StaticFlags};
    use courier_infra::publish::InMemoryPublisher;
    use courier_infra::store::InMemoryStore;
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = WorkerCtx {
            store: store.clone(),
            mailer: Arc::new(LogMailer),
            analytics: Arc::new(LogAnalytics),
            flags: Arc::new(StaticFlags::new()),
            publisher: Arc::new(InMemoryPublisher::new()),
        };
        let services = services::AppServices::from_context(ctx).unwrap();
        (build_app(services.dispatcher.clone()), store)
    }

    fn post(name: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(format!("/{name}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app();
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/health+json"
        );
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (app, _) = app();
        let res = app.oneshot(post("no-such-worker", "{}")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_bodies_are_acknowledged() {
        let (app, _) = app();
        let res = app
            .oneshot(post("comment-upvoted-rep", "not json"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn transient_failures_ask_for_redelivery() {
        let (app, store) = app();
        store.fail_next_operation(courier_core::StoreError::unavailable("pool timed out"));

        let message = codec::encode("m1", &json!({ "userId": "u2", "postId": "p1" })).unwrap();
        let body = serde_json::to_vec(&message.into_request()).unwrap();
        let res = app.oneshot(post("post-upvoted-rep", body)).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
