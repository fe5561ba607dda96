use std::path::PathBuf;

use reqwest::multipart::{Form, Part};

use crate::client::DifyClient;
use crate::error::{CoreResult, DifyError};
use crate::model::UploadedFile;
use crate::normalizer::require_text;

pub const UPLOAD_ENDPOINT: &str = "/files/upload";

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// In-memory content; needs an explicit filename.
    Bytes(Vec<u8>),
    /// A regular file on disk; the filename defaults to its last component.
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub source: FileSource,
    pub filename: Option<String>,
    pub user: String,
    /// Guessed from the filename when unset.
    pub mime_type: Option<String>,
}

impl FileUpload {
    pub fn from_bytes(data: Vec<u8>, filename: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            source: FileSource::Bytes(data),
            filename: Some(filename.into()),
            user: user.into(),
            mime_type: None,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            source: FileSource::Path(path.into()),
            filename: None,
            user: user.into(),
            mime_type: None,
        }
    }
}

/// Bytes plus the name and MIME type they will be sent under.
#[derive(Debug)]
pub(crate) struct LoadedFile {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl LoadedFile {
    pub(crate) fn into_part(self) -> CoreResult<Part> {
        Part::bytes(self.data)
            .file_name(self.filename)
            .mime_str(&self.mime_type)
            .map_err(|e| DifyError::UnsupportedInput(format!("bad mime type: {e}")))
    }
}

/// Resolve a source to bytes. Everything that makes the input unsendable
/// is reported as `UnsupportedInput` here, before any request goes out.
pub(crate) async fn load(
    source: &FileSource,
    filename: Option<&str>,
    mime_type: Option<&str>,
) -> CoreResult<LoadedFile> {
    let filename = filename.map(str::trim).filter(|f| !f.is_empty());
    let (data, filename) = match source {
        FileSource::Bytes(data) => {
            let name = filename.ok_or_else(|| {
                DifyError::UnsupportedInput("in-memory upload needs a filename".into())
            })?;
            (data.clone(), name.to_string())
        }
        FileSource::Path(path) => {
            let meta = tokio::fs::metadata(path).await.map_err(|e| {
                DifyError::UnsupportedInput(format!("cannot read {}: {e}", path.display()))
            })?;
            if !meta.is_file() {
                return Err(DifyError::UnsupportedInput(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            let name = match filename {
                Some(n) => n.to_string(),
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        DifyError::UnsupportedInput(format!("{} has no file name", path.display()))
                    })?,
            };
            (tokio::fs::read(path).await?, name)
        }
    };
    if data.is_empty() {
        return Err(DifyError::UnsupportedInput(format!("{filename} is empty")));
    }
    let mime_type = match mime_type {
        Some(m) => m.to_string(),
        None => mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    };
    Ok(LoadedFile {
        data,
        filename,
        mime_type,
    })
}

impl DifyClient {
    /// Upload a file for later use as a `local_file` input.
    pub async fn upload_file(&self, upload: FileUpload) -> CoreResult<UploadedFile> {
        let user = require_text("user", &upload.user)?;
        let file = load(
            &upload.source,
            upload.filename.as_deref(),
            upload.mime_type.as_deref(),
        )
        .await?;
        tracing::debug!(filename = %file.filename, bytes = file.data.len(), mime = %file.mime_type, "uploading file");
        let form = Form::new().part("file", file.into_part()?).text("user", user);
        self.post_form(UPLOAD_ENDPOINT, form).await
    }
}
