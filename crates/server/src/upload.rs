//! Issue submission extraction and photo storage.
//!
//! `POST /api/issues` accepts either `multipart/form-data` (with an optional
//! `photo` file part) or a JSON body with the same field names.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use civic::IssueSubmission;

use crate::error::ApiError;

/// URL prefix (and `photoPath` prefix) under which uploads are served.
pub const UPLOADS_PREFIX: &str = "uploads";

/// An uploaded photo held in memory until the submission is validated.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// A parsed creation request.
#[derive(Debug, Default)]
pub struct IssueForm {
    pub submission: IssueSubmission,
    pub photo: Option<PhotoUpload>,
}

#[async_trait]
impl<S> FromRequest<S> for IssueForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            return read_multipart(multipart).await;
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        if body.is_empty() {
            return Ok(IssueForm::default());
        }
        let submission = serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;
        Ok(IssueForm {
            submission,
            photo: None,
        })
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<IssueForm, ApiError> {
    let mut form = IssueForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "photo" {
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            if !data.is_empty() {
                form.photo = Some(PhotoUpload { file_name, data });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        let slot = match name.as_str() {
            "title" => &mut form.submission.title,
            "description" => &mut form.submission.description,
            "location" => &mut form.submission.location,
            "userId" => &mut form.submission.user_id,
            "userName" => &mut form.submission.user_name,
            _ => continue,
        };
        *slot = Some(value);
    }

    Ok(form)
}

/// Directory receiving uploaded photos.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let dir = Self::new(root);
        tokio::fs::create_dir_all(&dir.root)
            .await
            .with_context(|| format!("Failed to create uploads directory {}", dir.root.display()))?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `photo` under a unique name and return its public relative path.
    ///
    /// Names are `<unix-millis>-<random>` plus the original file's extension.
    pub async fn save(&self, photo: &PhotoUpload) -> Result<String> {
        let file_name = unique_file_name(photo.file_name.as_deref());
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, &photo.data)
            .await
            .with_context(|| format!("Failed to write upload {}", path.display()))?;
        Ok(format!("{}/{}", UPLOADS_PREFIX, file_name))
    }
}

fn unique_file_name(original: Option<&str>) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().as_u128() % 1_000_000_000;
    let extension = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!("{}-{}{}", millis, random, extension)
}
