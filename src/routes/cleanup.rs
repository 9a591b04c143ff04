use axum::Json;
use axum::extract::State;

use crate::dto::conversion::CleanupResponse;
use crate::errors::AppError;
use crate::services::sweeper;
use crate::state::AppState;

/// Runs the retention policy now instead of waiting for the next sweep.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/cleanup",
    tag = "Maintenance",
    responses(
        (status = 200, description = "Expired files removed", body = CleanupResponse),
        (status = 404, description = "Endpoint disabled", body = crate::dto::conversion::ConversionResult),
    )
))]
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, AppError> {
    if !state.config.retention.cleanup_endpoint_enabled {
        return Err(AppError::NotFound("Not found".to_string()));
    }

    let report = sweeper::run_cleanup(&state.store, &state.orchestrator, &state.retention_policy()).await?;

    Ok(Json(CleanupResponse {
        success: true,
        deleted_count: report.total(),
    }))
}
