use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod cleanup;
pub mod convert;
pub mod download;
pub mod health;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.upload.max_file_size_bytes + MULTIPART_OVERHEAD;
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/health", get(health::health_check))
        .route(
            "/convert",
            post(convert::convert).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/download/{id}", get(download::download))
        .route("/cleanup", post(cleanup::cleanup));

    #[cfg(feature = "openapi")]
    let api = {
        use utoipa::OpenApi;
        use utoipa_redoc::{Redoc, Servable};
        api.merge(Redoc::with_url("/docs", crate::openapi::ApiDoc::openapi()))
    };

    api.fallback_service(static_dir)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
