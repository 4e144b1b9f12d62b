use axum::{
    Json,
    extract::{
        FromRef, FromRequest, Multipart, Request,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{error, info, warn};

pub const ALLOWED_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".dcm"];
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Room for the text fields and multipart framing on top of the file itself.
pub const FORM_OVERHEAD: usize = 256 * 1024;

const FILE_FIELD: &str = "image";
const NAME_ATTEMPTS: i64 = 16;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_file_size: u64,
}

impl UploadSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_file_size).unwrap_or(usize::MAX) + FORM_OVERHEAD
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub original_name: String,
    pub content_type: Option<String>,
    /// `<epoch-ms>-<original name>`
    pub stored_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Multipart form of the combined analysis route: one optional image plus optional text.
#[derive(Debug, Default)]
pub struct AnalysisUpload {
    pub image: Option<StoredUpload>,
    pub text: Option<String>,
    pub speciality: Option<String>,
}

#[derive(Debug, Error)]
pub enum UploadRejection {
    #[error("Only images and DICOM files are allowed. Supported formats: {}", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedType { file_name: String },

    #[error("File too large. Maximum size is {} MB", MAX_FILE_SIZE / (1024 * 1024))]
    TooLarge,

    #[error("Unexpected field: {0}")]
    UnexpectedField(String),

    #[error("{0}")]
    Rejected(#[from] MultipartRejection),

    #[error("{0}")]
    Malformed(#[from] MultipartError),

    #[error("Failed to store uploaded file")]
    Storage(#[source] std::io::Error),
}

impl UploadRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadRejection::UnsupportedType { .. } | UploadRejection::UnexpectedField(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadRejection::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            UploadRejection::Rejected(rejection) => rejection.status(),
            UploadRejection::Malformed(err) => err.status(),
            UploadRejection::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            UploadRejection::Storage(e) => error!(error = %e, "Failed to store upload"),
            UploadRejection::UnsupportedType { file_name } => {
                warn!(file_name = %file_name, "Rejected upload with unsupported extension")
            }
            other => warn!(status = %status, reason = %other, "Rejected upload"),
        }
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            UploadRejection::TooLarge.to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<S> FromRequest<S> for AnalysisUpload
where
    S: Send + Sync,
    UploadSettings: FromRef<S>,
{
    type Rejection = UploadRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let settings = UploadSettings::from_ref(state);
        let mut multipart = Multipart::from_request(req, state).await?;
        let mut upload = AnalysisUpload::default();

        let outcome = read_fields(&mut multipart, &settings, &mut upload).await;
        if let Err(rejection) = outcome {
            // Files of a rejected request are not kept.
            if let Some(stored) = upload.image.take() {
                let _ = fs::remove_file(&stored.path).await;
            }
            return Err(rejection);
        }

        Ok(upload)
    }
}

async fn read_fields(
    multipart: &mut Multipart,
    settings: &UploadSettings,
    upload: &mut AnalysisUpload,
) -> Result<(), UploadRejection> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD => {
                if upload.image.is_some() {
                    return Err(UploadRejection::UnexpectedField(name));
                }
                upload.image = Some(store_file(field, settings).await?);
            }
            "text" => upload.text = Some(field.text().await?),
            "speciality" => upload.speciality = Some(field.text().await?),
            _ => {
                // Unknown fields are drained and ignored.
                field.bytes().await?;
            }
        }
    }
    Ok(())
}

/// Lower-cased extension including the dot, if the file name has one.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

pub fn is_allowed(file_name: &str) -> bool {
    extension_of(file_name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Final path component of a client-supplied name, whichever separator the client used.
fn base_name(file_name: &str) -> &str {
    file_name.rsplit(['/', '\\']).next().unwrap_or(file_name)
}

async fn store_file(
    mut field: Field<'_>,
    settings: &UploadSettings,
) -> Result<StoredUpload, UploadRejection> {
    let original_name = base_name(field.file_name().unwrap_or_default()).to_string();
    if !is_allowed(&original_name) {
        return Err(UploadRejection::UnsupportedType {
            file_name: original_name,
        });
    }
    let content_type = field.content_type().map(str::to_string);

    let (stored_name, path, mut file) = create_unique(&settings.dir, &original_name).await?;

    let mut size: u64 = 0;
    let written: Result<(), UploadRejection> = async {
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            if size > settings.max_file_size {
                return Err(UploadRejection::TooLarge);
            }
            file.write_all(&chunk)
                .await
                .map_err(UploadRejection::Storage)?;
        }
        file.flush().await.map_err(UploadRejection::Storage)
    }
    .await;

    if let Err(rejection) = written {
        drop(file);
        let _ = fs::remove_file(&path).await;
        return Err(rejection);
    }

    info!(stored_name = %stored_name, size, "Stored upload");
    Ok(StoredUpload {
        original_name,
        content_type,
        stored_name,
        path,
        size,
    })
}

async fn create_unique(
    dir: &Path,
    original_name: &str,
) -> Result<(String, PathBuf, fs::File), UploadRejection> {
    let now = chrono::Utc::now().timestamp_millis();
    for bump in 0..NAME_ATTEMPTS {
        let stored_name = format!("{}-{}", now + bump, original_name);
        let path = dir.join(&stored_name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((stored_name, path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(UploadRejection::Storage(e)),
        }
    }
    Err(UploadRejection::Storage(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {original_name}"),
    )))
}
