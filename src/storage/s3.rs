//! S3-compatible storage backend
//!
//! Talks to AWS S3 or any S3-compatible store (Cloudflare R2, MinIO, RustFS)
//! through the AWS SDK.
//!
//! # Example
//!
//! ```no_run
//! use filegate::config::S3Config;
//! use filegate::storage::{S3Backend, StorageBackend};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = S3Config {
//!     bucket: "my-bucket".to_string(),
//!     region: "auto".to_string(),
//!     endpoint: Some("http://localhost:9000".to_string()),
//!     access_key: Some("minioadmin".to_string()),
//!     secret_key: Some("minioadmin".to_string()),
//!     force_path_style: None,
//! };
//!
//! let backend = S3Backend::from_config(&config).await?;
//! let info = backend
//!     .put_object("hello.txt", Bytes::from("Hello, World!"), Some("text/plain"))
//!     .await?;
//! println!("ETag: {}", info.etag);
//! # Ok(())
//! # }
//! ```
//!
//! # Error mapping
//!
//! | S3 error code | [`StorageError`] |
//! |---------------|------------------|
//! | `NoSuchKey`, `NotFound`, HTTP 404 | `NotFound` |
//! | `NoSuchUpload` | `NoSuchUpload` |
//! | `InvalidPart`, `InvalidPartOrder` | `InvalidPart` |
//! | `EntityTooSmall` | `EntityTooSmall` |
//! | `InvalidRange`, HTTP 416 | `InvalidRange` |
//! | anything else | `Backend` |

use super::{
    quote_etag, CompletedPart, ListPage, ObjectBody, ObjectInfo, StorageBackend, StorageError,
};
use crate::config::S3Config;
use crate::range::ByteRange;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Provider name reported for credentials taken from the config file
const STATIC_CREDENTIALS_PROVIDER: &str = "filegate-config";

/// Storage backend over an S3 bucket
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Wrap an already configured SDK client
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from configuration.
    ///
    /// Static keys from the config take precedence; without them the SDK's
    /// default provider chain (environment, profile, instance metadata) is used.
    pub async fn from_config(config: &S3Config) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::ConfigError("bucket name is empty".into()));
        }

        let region = Region::new(config.region.clone());
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    STATIC_CREDENTIALS_PROVIDER,
                )),
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(StorageError::ConfigError(
                    "access_key and secret_key must be set together".into(),
                ))
            }
        };

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let path_style = config.force_path_style.unwrap_or(config.endpoint.is_some());
        builder = builder.force_path_style(path_style);

        Ok(Self::new(Client::from_conf(builder.build()), config.bucket.clone()))
    }

    /// Bucket this backend writes to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Classify an SDK failure by S3 error code and HTTP status
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, subject: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    let message = err
        .as_service_error()
        .and_then(|e| e.message())
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    match (code.as_deref(), status) {
        (Some("NoSuchKey") | Some("NotFound"), _) | (None, Some(404)) => {
            StorageError::NotFound(subject.to_string())
        }
        (Some("NoSuchUpload"), _) => StorageError::NoSuchUpload(subject.to_string()),
        (Some("InvalidPart") | Some("InvalidPartOrder"), _) => StorageError::InvalidPart(message),
        (Some("EntityTooSmall"), _) => StorageError::EntityTooSmall(message),
        (Some("InvalidRange"), _) | (_, Some(416)) => StorageError::InvalidRange,
        _ => StorageError::Backend(message),
    }
}

fn to_utc(time: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    time.and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

fn to_size(length: Option<i64>) -> u64 {
    length.and_then(|l| u64::try_from(l).ok()).unwrap_or(0)
}

#[async_trait]
impl StorageBackend for S3Backend {
    #[tracing::instrument(
        name = "storage.put_object",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.key = %key, upload.bytes = body.len(), s3.etag = tracing::field::Empty),
        err
    )]
    async fn put_object<'a>(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&'a str>,
    ) -> Result<ObjectInfo, StorageError> {
        let size = body.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let etag = quote_etag(output.e_tag().unwrap_or_default());
        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            etag,
            content_type: content_type.map(str::to_string),
            uploaded: Utc::now(),
        })
    }

    #[tracing::instrument(name = "storage.head_object", skip_all, fields(s3.bucket = %self.bucket, s3.key = %key))]
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: to_size(output.content_length()),
            etag: quote_etag(output.e_tag().unwrap_or_default()),
            content_type: output.content_type().map(str::to_string),
            uploaded: to_utc(output.last_modified()),
        })
    }

    #[tracing::instrument(
        name = "storage.get_object",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.key = %key, http.range = tracing::field::Empty)
    )]
    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectBody, StorageError> {
        let range_header = range.map(|r| r.to_header_value());
        if let Some(ref header) = range_header {
            tracing::Span::current().record("http.range", header.as_str());
        }

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range_header)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        // A ranged response reports the window length; the object size is the
        // denominator of Content-Range.
        let size = output
            .content_range()
            .and_then(|cr| cr.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
            .unwrap_or_else(|| to_size(output.content_length()));

        let info = ObjectInfo {
            key: key.to_string(),
            size,
            etag: quote_etag(output.e_tag().unwrap_or_default()),
            content_type: output.content_type().map(str::to_string),
            uploaded: to_utc(output.last_modified()),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read object body: {}", e)))?
            .into_bytes();

        Ok(ObjectBody { info, body })
    }

    #[tracing::instrument(name = "storage.delete_object", skip_all, fields(s3.bucket = %self.bucket, s3.key = %key))]
    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    #[tracing::instrument(name = "storage.list_objects", skip_all, fields(s3.bucket = %self.bucket, limit = limit))]
    async fn list_objects(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ListPage, StorageError> {
        let max_keys = i32::try_from(limit).unwrap_or(i32::MAX);
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(max_keys)
            .set_continuation_token(cursor)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    size: to_size(object.size()),
                    etag: quote_etag(object.e_tag().unwrap_or_default()),
                    content_type: None,
                    uploaded: to_utc(object.last_modified()),
                })
            })
            .collect();

        let cursor = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { objects, cursor })
    }

    #[tracing::instrument(
        name = "storage.create_multipart_upload",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    async fn create_multipart_upload<'a>(
        &self,
        key: &str,
        content_type: Option<&'a str>,
    ) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let upload_id = output
            .upload_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::Backend("response carried no upload id".into()))?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        Ok(upload_id)
    }

    #[tracing::instrument(
        name = "storage.upload_part",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.upload_id = %upload_id, s3.part_number = part_number, upload.bytes = body.len()),
        err
    )]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let number = i32::try_from(part_number)
            .map_err(|_| StorageError::InvalidPart(format!("part number {} out of range", part_number)))?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, upload_id))?;

        output
            .e_tag()
            .map(quote_etag)
            .ok_or_else(|| StorageError::Backend("response carried no part etag".into()))
    }

    #[tracing::instrument(
        name = "storage.complete_multipart_upload",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.upload_id = %upload_id, parts_count = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo, StorageError> {
        let completed: Vec<S3CompletedPart> = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(i32::try_from(part.part_number).unwrap_or(i32::MAX))
                    .e_tag(quote_etag(&part.etag))
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, upload_id))?;

        // The completion response carries no size; read it back.
        self.head_object(key).await
    }

    #[tracing::instrument(
        name = "storage.abort_multipart_upload",
        skip_all,
        fields(s3.bucket = %self.bucket, s3.upload_id = %upload_id),
        err
    )]
    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, upload_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "test-bucket".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            access_key: Some("test-key".into()),
            secret_key: Some("test-secret".into()),
            force_path_style: None,
        }
    }

    #[tokio::test]
    async fn test_backend_from_static_credentials() {
        let backend = S3Backend::from_config(&config()).await.unwrap();
        assert_eq!(backend.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn test_half_credentials_rejected() {
        let mut config = config();
        config.secret_key = None;
        let result = S3Backend::from_config(&config).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_empty_bucket_rejected() {
        let mut config = config();
        config.bucket = String::new();
        assert!(S3Backend::from_config(&config).await.is_err());
    }
}
