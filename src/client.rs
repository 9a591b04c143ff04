//! Client side of the conversion flow.
//!
//! [`ClientController`] mirrors what the browser page in `static/index.html`
//! does: reject obviously bad selections locally, upload, then show exactly
//! one outcome. The UI is modelled as a single [`UiState`] value published on
//! a `watch` channel, so only one of loading, success or error can ever be
//! visible.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio::sync::watch;

use crate::dto::conversion::ConversionResult;
use crate::services::validator::has_accepted_extension;

pub const NO_FILE_MESSAGE: &str = "Please select a file.";
pub const UNSUPPORTED_FILE_MESSAGE: &str = "Please select a Word document (.doc or .docx).";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UiState {
    #[default]
    Idle,
    Loading,
    Success {
        download_url: String,
        filename: String,
    },
    Error(String),
}

impl From<&ConversionResult> for UiState {
    fn from(result: &ConversionResult) -> Self {
        match (result.success, &result.download_url, &result.filename) {
            (true, Some(download_url), Some(filename)) => UiState::Success {
                download_url: download_url.clone(),
                filename: filename.clone(),
            },
            _ => UiState::Error(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Conversion failed".to_string()),
            ),
        }
    }
}

/// A file picked by the user.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedBody { status: u16, body: String },
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, file: &SelectedFile) -> Result<ConversionResult, TransportError>;
}

/// Talks to a running server over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetches the PDF behind a `download_url` from a successful conversion.
    pub async fn download(&self, download_url: &str) -> Result<Vec<u8>, TransportError> {
        let bytes = self
            .client
            .get(format!("{}{download_url}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(&self, file: &SelectedFile) -> Result<ConversionResult, TransportError> {
        let part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .multipart(form)
            .send()
            .await?;

        // 400 and 500 responses carry the same JSON contract as 200.
        let status = response.status().as_u16();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| TransportError::UnexpectedBody { status, body })
    }
}

pub struct ClientController<T> {
    transport: T,
    state: watch::Sender<UiState>,
}

impl<T: UploadTransport> ClientController<T> {
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(UiState::Idle);
        Self { transport, state }
    }

    pub fn state(&self) -> UiState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    /// Validates locally, uploads, and settles on exactly one outcome.
    ///
    /// A missing or non-Word file never reaches the transport.
    pub async fn submit(&self, file: Option<SelectedFile>) -> ConversionResult {
        let Some(file) = file else {
            return self.finish(ConversionResult::failure(NO_FILE_MESSAGE));
        };
        if !has_accepted_extension(&file.file_name) {
            return self.finish(ConversionResult::failure(UNSUPPORTED_FILE_MESSAGE));
        }

        self.state.send_replace(UiState::Loading);

        let result = match self.transport.upload(&file).await {
            Ok(result) => result,
            Err(e) => ConversionResult::failure(format!("An error occurred: {e}")),
        };
        self.finish(result)
    }

    fn finish(&self, result: ConversionResult) -> ConversionResult {
        self.state.send_replace(UiState::from(&result));
        result
    }
}
