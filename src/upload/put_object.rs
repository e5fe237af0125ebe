//! Single-shot uploads
//!
//! Stores a whole file in one backend put. Used for files small enough to
//! send in a single request, and for reuploading over an existing key.

use super::UploadError;
use crate::metrics;
use crate::storage::StorageBackend;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// File received from a form upload
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Response body of a simple upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleUploadReceipt {
    pub key: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    /// True when the caller chose the key (reupload over an existing object)
    pub replaced: bool,
}

/// Simple upload handler
#[derive(Clone)]
pub struct SimpleUploader {
    storage: Arc<dyn StorageBackend>,
}

impl SimpleUploader {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Store `file`, under `key_override` when it is non-blank.
    #[tracing::instrument(
        name = "upload.put_object",
        skip(self, file),
        fields(
            upload.filename = %file.file_name,
            upload.bytes = file.data.len(),
            upload.key = tracing::field::Empty,
            storage.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload(
        &self,
        file: FilePart,
        key_override: Option<&str>,
    ) -> Result<SimpleUploadReceipt, UploadError> {
        let start_time = Instant::now();
        let filename = base_name(&file.file_name).to_string();

        let (key, replaced) = match key_override.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => (key.to_string(), true),
            None => (generated_key(&filename), false),
        };
        let content_type = file
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let span = tracing::Span::current();
        span.record("upload.key", key.as_str());

        let size = file.data.len() as u64;
        match self
            .storage
            .put_object(&key, file.data, Some(&content_type))
            .await
        {
            Ok(info) => {
                metrics::record_upload_success("simple", size);
                span.record("storage.etag", info.etag.as_str());
                tracing::info!(
                    key = %key,
                    size = size,
                    replaced = replaced,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Simple upload completed"
                );

                Ok(SimpleUploadReceipt {
                    key,
                    filename,
                    size,
                    content_type,
                    replaced,
                })
            }
            Err(e) => {
                metrics::record_upload_failure("simple");
                metrics::record_error("storage_put");
                tracing::error!(
                    error = %e,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Simple upload failed"
                );
                Err(e.into())
            }
        }
    }
}

/// `<unix-millis>-<file name>`
fn generated_key(filename: &str) -> String {
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), filename)
}

/// Last path component of a client-supplied file name
fn base_name(file_name: &str) -> &str {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if name.is_empty() {
        "upload"
    } else {
        name
    }
}
