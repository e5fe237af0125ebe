//! Multipart upload coordinator
//!
//! Server side of the chunked upload protocol. Holds no session state of its
//! own: every call is addressed by `(key, upload_id)` and the backend owns
//! the open upload and its stored parts.

use super::{PartReceipt, UploadError, UploadSession};
use crate::metrics;
use crate::storage::{CompletedPart, ObjectInfo, StorageBackend};
use bytes::Bytes;
use std::sync::Arc;

/// Highest part number a backend accepts
pub const MAX_PARTS: u32 = 10000;

/// Parse a `partNumber` query value. Valid numbers are `1..=MAX_PARTS`.
pub fn parse_part_number(raw: &str) -> Result<u32, UploadError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if (1..=MAX_PARTS).contains(&n) => Ok(n),
        _ => Err(UploadError::InvalidPartNumber(raw.to_string())),
    }
}

/// Coordinates create, upload-part, complete and abort against a backend
#[derive(Clone)]
pub struct MultipartCoordinator {
    storage: Arc<dyn StorageBackend>,
    min_part_size: u64,
}

impl MultipartCoordinator {
    pub fn new(storage: Arc<dyn StorageBackend>, min_part_size: u64) -> Self {
        Self {
            storage,
            min_part_size,
        }
    }

    /// Open an upload for `key`
    #[tracing::instrument(
        name = "upload.multipart.create",
        skip(self),
        fields(upload.id = tracing::field::Empty),
        err
    )]
    pub async fn create(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<UploadSession, UploadError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(UploadError::MissingParameter("key parameter"));
        }

        let upload_id = self
            .storage
            .create_multipart_upload(key, content_type)
            .await
            .inspect_err(|_| metrics::record_upload_failure("multipart"))?;

        tracing::Span::current().record("upload.id", upload_id.as_str());
        tracing::info!(key = %key, upload_id = %upload_id, "Created multipart upload");

        Ok(UploadSession::new(key, upload_id))
    }

    /// Store one part. Re-sending a part number replaces the earlier bytes.
    #[tracing::instrument(
        name = "upload.multipart.upload_part",
        skip(self, body),
        fields(upload.bytes = body.len()),
        err
    )]
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<PartReceipt, UploadError> {
        if key.is_empty() || upload_id.is_empty() {
            return Err(UploadError::MissingParameter("uploadId, partNumber, or key"));
        }
        if !(1..=MAX_PARTS).contains(&part_number) {
            return Err(UploadError::InvalidPartNumber(part_number.to_string()));
        }
        if body.is_empty() {
            return Err(UploadError::MissingParameter("request body"));
        }

        if (body.len() as u64) < self.min_part_size {
            // Allowed for the final part; the backend rejects it at completion otherwise
            tracing::warn!(
                part_number = part_number,
                size = body.len(),
                min_part_size = self.min_part_size,
                "Part is below the minimum part size"
            );
        }

        let size = body.len();
        let etag = self
            .storage
            .upload_part(key, upload_id, part_number, body)
            .await
            .inspect_err(|_| metrics::record_part_upload(false))?;
        metrics::record_part_upload(true);

        tracing::debug!(
            upload_id = %upload_id,
            part_number = part_number,
            size = size,
            etag = %etag,
            "Uploaded part"
        );

        Ok(PartReceipt { part_number, etag })
    }

    /// Assemble the listed parts into the final object.
    ///
    /// Parts are sorted by number before reaching the backend. On any
    /// failure the upload stays open and can be completed again or aborted.
    #[tracing::instrument(
        name = "upload.multipart.complete",
        skip(self, parts),
        fields(upload.parts = parts.len(), upload.bytes = tracing::field::Empty),
        err
    )]
    pub async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        mut parts: Vec<PartReceipt>,
    ) -> Result<ObjectInfo, UploadError> {
        if key.is_empty() || upload_id.is_empty() || parts.is_empty() {
            return Err(UploadError::MissingParameter("required parameters"));
        }

        parts.sort_by_key(|p| p.part_number);
        if let Some(first) = parts.first() {
            if first.part_number == 0 {
                return Err(UploadError::InvalidPartNumber("0".into()));
            }
        }
        if let Some(pair) = parts
            .windows(2)
            .find(|pair| pair[0].part_number == pair[1].part_number)
        {
            return Err(UploadError::DuplicatePart(pair[0].part_number));
        }

        let parts_count = parts.len();
        let completed: Vec<CompletedPart> = parts.into_iter().map(CompletedPart::from).collect();
        let info = self
            .storage
            .complete_multipart_upload(key, upload_id, &completed)
            .await
            .inspect_err(|e| {
                tracing::warn!(upload_id = %upload_id, error = %e, "Multipart completion failed");
                metrics::record_upload_failure("multipart");
            })?;

        tracing::Span::current().record("upload.bytes", info.size);
        metrics::record_multipart_complete(parts_count, info.size);
        tracing::info!(
            key = %info.key,
            upload_id = %upload_id,
            parts = parts_count,
            size = info.size,
            "Completed multipart upload"
        );

        Ok(info)
    }

    /// Discard an open upload and its parts
    #[tracing::instrument(name = "upload.multipart.abort", skip(self), err)]
    pub async fn abort(&self, key: &str, upload_id: &str) -> Result<(), UploadError> {
        if key.is_empty() || upload_id.is_empty() {
            return Err(UploadError::MissingParameter("uploadId or key"));
        }

        self.storage.abort_multipart_upload(key, upload_id).await?;
        tracing::info!(key = %key, upload_id = %upload_id, "Aborted multipart upload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, MockStorageBackend, StorageError};

    const MIN: u64 = 8;

    fn coordinator() -> (MultipartCoordinator, Arc<MemoryBackend>) {
        let storage = Arc::new(MemoryBackend::new(MIN));
        (MultipartCoordinator::new(storage.clone(), MIN), storage)
    }

    #[test]
    fn test_parse_part_number() {
        assert_eq!(parse_part_number("1"), Ok(1));
        assert_eq!(parse_part_number("10000"), Ok(10000));
        assert!(parse_part_number("0").is_err());
        assert!(parse_part_number("10001").is_err());
        assert!(parse_part_number("-1").is_err());
        assert!(parse_part_number("abc").is_err());
        assert!(parse_part_number("").is_err());
    }

    #[tokio::test]
    async fn test_create_requires_key() {
        let (coordinator, _) = coordinator();
        let err = coordinator.create("   ", None).await.unwrap_err();
        assert_eq!(err, UploadError::MissingParameter("key parameter"));
    }

    #[tokio::test]
    async fn test_full_flow() {
        let (coordinator, storage) = coordinator();
        let mut session = coordinator.create("video.mp4", None).await.unwrap();
        assert_eq!(storage.open_uploads(), 1);

        let chunks: [&[u8]; 3] = [b"AAAAAAAA", b"BBBBBBBB", b"CC"];
        for (n, chunk) in chunks.iter().enumerate() {
            let receipt = coordinator
                .upload_part(
                    &session.key,
                    &session.upload_id,
                    n as u32 + 1,
                    Bytes::copy_from_slice(chunk),
                )
                .await
                .unwrap();
            session.record(receipt);
        }

        let info = coordinator
            .complete(&session.key, &session.upload_id, session.parts.clone())
            .await
            .unwrap();
        assert_eq!(info.size, 18);
        assert_eq!(storage.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_upload_part_validation() {
        let (coordinator, _) = coordinator();
        let body = Bytes::from_static(b"data");

        assert!(matches!(
            coordinator.upload_part("k", "u", 0, body.clone()).await,
            Err(UploadError::InvalidPartNumber(_))
        ));
        assert!(matches!(
            coordinator.upload_part("k", "u", MAX_PARTS + 1, body.clone()).await,
            Err(UploadError::InvalidPartNumber(_))
        ));
        assert!(matches!(
            coordinator.upload_part("", "u", 1, body).await,
            Err(UploadError::MissingParameter(_))
        ));
        assert!(matches!(
            coordinator.upload_part("k", "u", 1, Bytes::new()).await,
            Err(UploadError::MissingParameter("request body"))
        ));
    }

    #[tokio::test]
    async fn test_upload_part_unknown_upload_is_rejected() {
        let (coordinator, _) = coordinator();
        let err = coordinator
            .upload_part("k", "missing", 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_complete_rejects_duplicates_and_zero() {
        let (coordinator, _) = coordinator();
        let parts = vec![
            PartReceipt {
                part_number: 2,
                etag: "a".into(),
            },
            PartReceipt {
                part_number: 2,
                etag: "b".into(),
            },
        ];
        assert_eq!(
            coordinator.complete("k", "u", parts).await,
            Err(UploadError::DuplicatePart(2))
        );

        let parts = vec![PartReceipt {
            part_number: 0,
            etag: "a".into(),
        }];
        assert!(matches!(
            coordinator.complete("k", "u", parts).await,
            Err(UploadError::InvalidPartNumber(_))
        ));

        assert!(matches!(
            coordinator.complete("k", "u", Vec::new()).await,
            Err(UploadError::MissingParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_sorts_parts_for_backend() {
        let mut storage = MockStorageBackend::new();
        storage
            .expect_complete_multipart_upload()
            .withf(|_, _, parts| {
                parts.iter().map(|p| p.part_number).collect::<Vec<_>>() == vec![1, 2, 3]
            })
            .returning(|key, _, _| {
                Ok(ObjectInfo {
                    key: key.to_string(),
                    size: 3,
                    etag: "\"x-3\"".into(),
                    content_type: None,
                    uploaded: chrono::Utc::now(),
                })
            });

        let coordinator = MultipartCoordinator::new(Arc::new(storage), MIN);
        let parts = [3, 1, 2]
            .into_iter()
            .map(|n| PartReceipt {
                part_number: n,
                etag: format!("e{}", n),
            })
            .collect();
        let info = coordinator.complete("k", "u", parts).await.unwrap();
        assert_eq!(info.size, 3);
    }

    #[tokio::test]
    async fn test_backend_failure_is_server_error() {
        let mut storage = MockStorageBackend::new();
        storage
            .expect_create_multipart_upload()
            .returning(|_, _| Err(StorageError::Backend("connection reset".into())));

        let coordinator = MultipartCoordinator::new(Arc::new(storage), MIN);
        let err = coordinator.create("k", None).await.unwrap_err();
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_abort_then_complete_fails() {
        let (coordinator, _) = coordinator();
        let session = coordinator.create("k", None).await.unwrap();
        let receipt = coordinator
            .upload_part("k", &session.upload_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();

        coordinator.abort("k", &session.upload_id).await.unwrap();

        let err = coordinator
            .complete("k", &session.upload_id, vec![receipt])
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(coordinator.abort("k", &session.upload_id).await.is_err());
    }
}
