use serde::{Deserialize, Serialize};

use crate::services::result_store::StoredArtifact;

/// The uniform JSON body of `POST /convert` and of every error response.
///
/// Either `download_url` and `filename` are set (success) or `error` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConversionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn success(download_url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            success: true,
            download_url: Some(download_url.into()),
            filename: Some(filename.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            download_url: None,
            filename: None,
            error: Some(error.into()),
        }
    }
}

impl From<&StoredArtifact> for ConversionResult {
    fn from(artifact: &StoredArtifact) -> Self {
        Self::success(download_path(&artifact.id), artifact.file_name.clone())
    }
}

pub fn download_path(artifact_id: &str) -> String {
    format!("/download/{artifact_id}")
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let body = serde_json::to_value(ConversionResult::success("/download/abc", "Report.pdf")).unwrap();
        assert_eq!(
            body,
            json!({"success": true, "download_url": "/download/abc", "filename": "Report.pdf"})
        );
    }

    #[test]
    fn test_failure_shape() {
        let body = serde_json::to_value(ConversionResult::failure("No selected file")).unwrap();
        assert_eq!(body, json!({"success": false, "error": "No selected file"}));
    }

    #[test]
    fn test_decodes_partial_bodies() {
        let parsed: ConversionResult = serde_json::from_str(r#"{"success":false,"error":"x"}"#).unwrap();
        assert_eq!(parsed, ConversionResult::failure("x"));
    }
}
