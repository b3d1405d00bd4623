use axum::http::header;
use axum::response::IntoResponse;

pub async fn health() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/health+json")],
        r#"{"status":"ok"}"#,
    )
}
