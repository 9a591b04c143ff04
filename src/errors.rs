use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::dto::conversion::ConversionResult;
use crate::services::orchestrator::ConversionError;
use crate::services::result_store::StoreError;
use crate::services::validator::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid multipart data: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound(err.to_string()),
            StoreError::Io(e) => AppError::Internal(e.into()),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conversion(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            AppError::Conversion(e) => {
                tracing::error!("Conversion error: {e}");
                e.to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ConversionResult::failure(message))).into_response()
    }
}
