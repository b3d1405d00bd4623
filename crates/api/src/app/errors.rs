use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_events::{DispatchReport, Disposition, RegistryError};
use serde_json::json;

/// Acknowledge with `204`, ask for redelivery with `500`.
pub fn report_to_response(report: &DispatchReport) -> Response {
    match report.disposition() {
        Disposition::Acknowledge => StatusCode::NO_CONTENT.into_response(),
        Disposition::Redeliver => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "redeliver",
            format!(
                "{} failed ({})",
                report.route,
                report.failure.map(|f| f.as_str()).unwrap_or("unknown")
            ),
        ),
    }
}

pub fn registry_error_to_response(err: RegistryError) -> Response {
    match err {
        RegistryError::Unknown(name) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no worker or cron named '{name}'"),
        ),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "registry_error",
            other.to_string(),
        ),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
