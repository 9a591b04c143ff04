/// Extensions accepted for conversion, compared case-insensitively.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["doc", "docx"];

pub const MISSING_FILE_MESSAGE: &str = "No selected file";
pub const UNSUPPORTED_TYPE_MESSAGE: &str =
    "Invalid file format. Please upload a Word document (.doc or .docx)";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No selected file")]
    Missing,

    #[error("Invalid file format. Please upload a Word document (.doc or .docx)")]
    UnsupportedType(String),

    #[error("File too large. Maximum size is {} MB", .max_bytes / 1024 / 1024)]
    TooLarge { max_bytes: usize },
}

/// A file as received from the multipart body, before any checks.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// An upload that passed [`validate`]. Only constructible through it.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    file_name: String,
    extension: String,
    bytes: Vec<u8>,
}

impl ValidatedUpload {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name without its extension, used for the suggested download name.
    pub fn stem(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.file_name)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Lowercased extension of `file_name`, if it has a non-empty one.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// The file name as it will be stored: directory components a client put in
/// are dropped, then surrounding whitespace.
pub fn normalize_file_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim()
}

/// The single extension rule shared by the server and the client.
pub fn has_accepted_extension(file_name: &str) -> bool {
    extension_of(normalize_file_name(file_name))
        .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn validate(upload: Option<UploadRequest>) -> Result<ValidatedUpload, ValidationError> {
    let upload = upload.ok_or(ValidationError::Missing)?;

    // Browsers send an empty part when the input had nothing selected.
    let file_name = normalize_file_name(&upload.file_name).to_string();
    if file_name.is_empty() {
        return Err(ValidationError::Missing);
    }

    if !has_accepted_extension(&file_name) {
        return Err(ValidationError::UnsupportedType(file_name));
    }
    let extension = extension_of(&file_name).unwrap_or_default();

    Ok(ValidatedUpload {
        file_name,
        extension,
        bytes: upload.bytes,
    })
}

pub fn check_size(len: usize, max_bytes: usize) -> Result<(), ValidationError> {
    if len > max_bytes {
        return Err(ValidationError::TooLarge { max_bytes });
    }
    Ok(())
}
