use utoipa::OpenApi;

use crate::dto::conversion::{CleanupResponse, ConversionResult};
use crate::routes::health::HealthResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DOCX to PDF API",
        version = "0.1.0",
        description = "Upload a Word document, get a PDF back."
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::convert::convert,
        crate::routes::download::download,
        crate::routes::cleanup::cleanup,
    ),
    components(schemas(ConversionResult, CleanupResponse, HealthResponse)),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Conversion", description = "Upload, convert and download"),
        (name = "Maintenance", description = "Retention and cleanup"),
    )
)]
pub struct ApiDoc;
