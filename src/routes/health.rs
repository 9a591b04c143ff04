use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub artifacts: usize,
}

#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        artifacts: state.store.len(),
    })
}
