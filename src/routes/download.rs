use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Response, StatusCode, header};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::ReaderStream;

use crate::errors::AppError;
use crate::state::AppState;

/// RFC 5987 `attr-char`: everything else in `filename*` is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/download/{id}",
    tag = "Conversion",
    params(("id" = String, Path, description = "Artifact id from `download_url`")),
    responses(
        (status = 200, description = "Converted PDF", content_type = "application/pdf"),
        (status = 404, description = "Unknown or expired artifact", body = crate::dto::conversion::ConversionResult),
    )
))]
#[tracing::instrument(skip(state), fields(operation = "download_artifact"))]
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>, AppError> {
    let lease = state.store.resolve(&id)?;
    let artifact = lease.artifact();

    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %artifact.path.display(), "Artifact registered but missing on disk");
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(AppError::Internal(e.into())),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .len();

    let disposition = content_disposition(&artifact.file_name);

    // The lease travels with the body so the sweeper leaves the file alone until streaming ends.
    let body_stream = ReaderStream::new(file).map(move |chunk| {
        let _held = &lease;
        chunk
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {e}")))
}

/// `attachment` with an ASCII `filename` for old clients and the exact UTF-8
/// name in `filename*`.
fn content_disposition(file_name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitize_file_name(file_name),
        utf8_percent_encode(file_name, ATTR_CHAR)
    )
}

/// Keeps the suggested name inside a quoted ASCII header parameter.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}
