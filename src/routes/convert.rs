use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dto::conversion::ConversionResult;
use crate::errors::AppError;
use crate::services::validator::{self, UploadRequest, ValidationError};
use crate::state::AppState;

/// Multipart form field carrying the document.
const FILE_FIELD: &str = "file";

#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/convert",
    tag = "Conversion",
    request_body(content = String, content_type = "multipart/form-data", description = "Form with a `file` field holding a .doc or .docx document"),
    responses(
        (status = 200, description = "Converted", body = ConversionResult),
        (status = 400, description = "Missing or unsupported file", body = ConversionResult),
        (status = 500, description = "Conversion failed", body = ConversionResult),
    )
))]
pub async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ConversionResult>, AppError> {
    let max_bytes = state.config.upload.max_file_size_bytes;
    let upload = read_file_field(&mut multipart, max_bytes).await?;

    if let Some(upload) = &upload {
        validator::check_size(upload.bytes.len(), max_bytes)?;
    }
    let upload = validator::validate(upload)?;

    let artifact = state.orchestrator.convert(upload).await?;

    Ok(Json(ConversionResult::from(&artifact)))
}

/// Pulls the `file` part out of the form, skipping any other fields.
async fn read_file_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Option<UploadRequest>, AppError> {
    let to_app_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::Validation(ValidationError::TooLarge { max_bytes })
        } else {
            AppError::BadRequest(e.body_text())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(to_app_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(to_app_error)?;

        return Ok(Some(UploadRequest {
            file_name,
            bytes: bytes.to_vec(),
        }));
    }

    Ok(None)
}
