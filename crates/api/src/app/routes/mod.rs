use axum::{Router, body::Bytes, response::Response, routing::post};
use courier_events::Dispatcher;
use courier_workers::WorkerCtx;

use crate::app::errors::{registry_error_to_response, report_to_response};

pub mod system;

/// One `POST /{name}` route per registered worker and cron.
///
/// The body is handed to the dispatcher as raw bytes so that a malformed
/// envelope is classified (and acknowledged) rather than rejected by an
/// extractor.
pub fn router(dispatcher: Dispatcher<WorkerCtx>) -> Router {
    let names: Vec<&'static str> = dispatcher.registry().routes().map(|(name, _)| name).collect();

    names.into_iter().fold(Router::new(), |router, name| {
        let dispatcher = dispatcher.clone();
        router.route(
            &format!("/{name}"),
            post(move |body: Bytes| dispatch(dispatcher.clone(), name, body)),
        )
    })
}

async fn dispatch(dispatcher: Dispatcher<WorkerCtx>, name: &'static str, body: Bytes) -> Response {
    match dispatcher.dispatch(name, &body).await {
        Ok(report) => report_to_response(&report),
        Err(e) => registry_error_to_response(e),
    }
}
