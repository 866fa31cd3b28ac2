//! Axum router construction.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`]. The API is deliberately small: records
//! are created, read, granted capabilities, and patched — the data plane
//! belongs to the object store, reached through presigned URLs.

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::handlers::{file, health};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the Filestore API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Filestore API",
        version = "0.1.0",
        description = "File lifecycle service issuing presigned object-store capabilities"
    ),
    paths(
        health::healthz,
        file::create_file,
        file::read_file,
        file::read_files,
        file::access_file,
        file::update_file,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "File", description = "File record lifecycle operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let openapi = ApiDoc::openapi();

    let mut router = Router::new()
        .route("/files", post(file::create_file).get(file::read_files))
        .route("/files/:id", get(file::read_file).patch(file::update_file))
        .route("/files/:id/access/:method", get(file::access_file))
        .route("/openapi.json", get(move || async move { Json(openapi) }));

    if state.config.observability.health_check {
        router = router.route("/healthz", get(health::healthz));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Outermost layer so it captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
}
