//! Health probe handler.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// `GET /healthz` -- Liveness probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Health",
    operation_id = "Healthz",
    responses((status = 200, description = "Service is up"))
)]
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
