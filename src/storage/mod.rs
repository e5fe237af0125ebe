//! Storage backend module
//!
//! Defines the object-store capabilities the gateway calls into: simple
//! put/get/head/delete/list plus the multipart primitives
//! create/upload-part/complete/abort.
//!
//! # Backends
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | In-memory | [`memory`] | Process-local; enforces the same multipart rules as S3 |
//! | S3-compatible | [`s3`] | AWS SDK; works with R2, MinIO, RustFS |
//!
//! Backends own all durable state. In particular an open multipart upload
//! lives only in the backend, addressed by its upload id.

use crate::config::{StorageConfig, UploadConfig};
use crate::range::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryBackend;
pub use s3::S3Backend;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Part too small: {0}")]
    EntityTooSmall(String),

    #[error("Requested range not satisfiable")]
    InvalidRange,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether the backend rejected data the client sent, as opposed to
    /// failing on its own.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            StorageError::NoSuchUpload(_)
                | StorageError::InvalidPart(_)
                | StorageError::EntityTooSmall(_)
                | StorageError::InvalidRange
        )
    }
}

/// Descriptor of a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub uploaded: DateTime<Utc>,
}

/// Object contents returned by a (possibly ranged) read
#[derive(Debug, Clone)]
pub struct ObjectBody {
    /// Descriptor of the whole object, not of the returned window
    pub info: ObjectInfo,
    pub body: Bytes,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Continuation cursor; `None` once the listing is exhausted
    pub cursor: Option<String>,
}

/// A stored part, as named in a completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object-store capabilities the gateway depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a whole object, replacing any previous object under `key`
    async fn put_object<'a>(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&'a str>,
    ) -> Result<ObjectInfo, StorageError>;

    /// Object metadata without contents
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError>;

    /// Object contents, restricted to `range` when given
    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectBody, StorageError>;

    /// Remove an object
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// One page of objects in key order, starting after `cursor`
    async fn list_objects(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ListPage, StorageError>;

    /// Open a multipart upload and return its upload id
    async fn create_multipart_upload<'a>(
        &self,
        key: &str,
        content_type: Option<&'a str>,
    ) -> Result<String, StorageError>;

    /// Store one part and return its etag. Re-sending a part number replaces it.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError>;

    /// Assemble the listed parts, in the given (ascending) order, into one object
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo, StorageError>;

    /// Discard an open upload and its parts
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str)
        -> Result<(), StorageError>;
}

/// Build the configured backend
pub async fn from_config(
    storage: &StorageConfig,
    upload: &UploadConfig,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match storage {
        StorageConfig::Memory => {
            tracing::info!(
                min_part_size = upload.min_part_size,
                "Using in-memory storage backend"
            );
            Ok(Arc::new(MemoryBackend::new(upload.min_part_size)))
        }
        StorageConfig::S3(s3) => {
            tracing::info!(
                bucket = %s3.bucket,
                region = %s3.region,
                endpoint = ?s3.endpoint,
                "Using S3 storage backend"
            );
            Ok(Arc::new(S3Backend::from_config(s3).await?))
        }
    }
}

/// Quote an etag the way S3 reports it.
pub(crate) fn quote_etag(etag: &str) -> String {
    if etag.len() >= 2 && etag.starts_with('"') && etag.ends_with('"') {
        etag.to_string()
    } else {
        format!("\"{}\"", etag)
    }
}

/// Etag with surrounding quotes removed, for comparisons.
pub(crate) fn strip_etag_quotes(etag: &str) -> &str {
    let etag = etag.trim();
    etag.strip_prefix('"')
        .and_then(|e| e.strip_suffix('"'))
        .unwrap_or(etag)
}
