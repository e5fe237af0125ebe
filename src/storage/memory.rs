//! In-memory storage backend
//!
//! Keeps objects and open multipart uploads in process memory. Multipart
//! rules mirror S3: parts are addressed by number (last write wins), the
//! completion list must name stored parts with matching etags, and every part
//! but the last must reach the minimum part size.

use super::{
    quote_etag, strip_etag_quotes, CompletedPart, ListPage, ObjectBody, ObjectInfo,
    StorageBackend, StorageError,
};
use crate::range::ByteRange;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    uploaded: DateTime<Utc>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: self.etag.clone(),
            content_type: self.content_type.clone(),
            uploaded: self.uploaded,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredPart {
    data: Bytes,
    etag: String,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, StoredPart>,
}

/// Process-local object store
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    uploads: DashMap<String, PendingUpload>,
    min_part_size: u64,
}

impl MemoryBackend {
    /// Create an empty store enforcing `min_part_size` on non-final parts
    pub fn new(min_part_size: u64) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            uploads: DashMap::new(),
            min_part_size,
        }
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Number of multipart uploads still open
    pub fn open_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Look up an open upload, checking it belongs to `key`
    fn pending<'a>(
        &'a self,
        key: &str,
        upload_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'a, String, PendingUpload>, StorageError> {
        match self.uploads.get_mut(upload_id) {
            Some(upload) if upload.key == key => Ok(upload),
            _ => Err(StorageError::NoSuchUpload(upload_id.to_string())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(5 * 1024 * 1024)
    }
}

/// Content fingerprint in the shape S3 uses: 32 hex chars.
fn content_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    quote_etag(&hex::encode(&digest[..16]))
}

/// Multipart etag: hash of the part hashes, suffixed with the part count.
fn multipart_etag(part_etags: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for etag in part_etags {
        hasher.update(strip_etag_quotes(etag).as_bytes());
    }
    let digest = hasher.finalize();
    quote_etag(&format!("{}-{}", hex::encode(&digest[..16]), part_etags.len()))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(name = "storage.put_object", skip_all, fields(storage.key = %key, upload.bytes = body.len()))]
    async fn put_object<'a>(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&'a str>,
    ) -> Result<ObjectInfo, StorageError> {
        let object = StoredObject {
            etag: content_etag(&body),
            data: body,
            content_type: content_type.map(str::to_string),
            uploaded: Utc::now(),
        };
        let info = object.info(key);
        self.objects.write().insert(key.to_string(), object);
        Ok(info)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        self.objects
            .read()
            .get(key)
            .map(|object| object.info(key))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    #[tracing::instrument(name = "storage.get_object", skip_all, fields(storage.key = %key))]
    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectBody, StorageError> {
        let objects = self.objects.read();
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let body = match range {
            None => object.data.clone(),
            Some(range) => {
                if range.end() >= object.data.len() as u64 {
                    return Err(StorageError::InvalidRange);
                }
                object
                    .data
                    .slice(range.start() as usize..=range.end() as usize)
            }
        };

        Ok(ObjectBody {
            info: object.info(key),
            body,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        // Deleting a missing key succeeds, as it does on S3.
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list_objects(
        &self,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ListPage, StorageError> {
        let objects = self.objects.read();
        let lower = match cursor {
            Some(ref after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };

        let mut page: Vec<ObjectInfo> = objects
            .range((lower, Bound::Unbounded))
            .take(limit.saturating_add(1))
            .map(|(key, object)| object.info(key))
            .collect();

        let cursor = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|info| info.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            cursor,
        })
    }

    #[tracing::instrument(name = "storage.create_multipart_upload", skip_all, fields(storage.key = %key))]
    async fn create_multipart_upload<'a>(
        &self,
        key: &str,
        content_type: Option<&'a str>,
    ) -> Result<String, StorageError> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    #[tracing::instrument(
        name = "storage.upload_part",
        skip_all,
        fields(storage.key = %key, storage.upload_id = %upload_id, storage.part_number = part_number, upload.bytes = body.len())
    )]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        if part_number == 0 {
            return Err(StorageError::InvalidPart("part numbers start at 1".into()));
        }
        let mut upload = self.pending(key, upload_id)?;
        let etag = content_etag(&body);
        upload.parts.insert(
            part_number,
            StoredPart {
                data: body,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    #[tracing::instrument(
        name = "storage.complete_multipart_upload",
        skip_all,
        fields(storage.key = %key, storage.upload_id = %upload_id, parts_count = parts.len())
    )]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo, StorageError> {
        if parts.is_empty() {
            return Err(StorageError::InvalidPart("no parts listed".into()));
        }

        // Validate and assemble while the upload stays open, so a rejected
        // completion can be retried or aborted.
        let (object, part_count) = {
            let upload = self.pending(key, upload_id)?;
            let mut total = 0u64;
            let mut previous = 0u32;
            let mut stored = Vec::with_capacity(parts.len());

            for (index, listed) in parts.iter().enumerate() {
                if listed.part_number <= previous {
                    return Err(StorageError::InvalidPart(format!(
                        "part {} listed out of ascending order",
                        listed.part_number
                    )));
                }
                previous = listed.part_number;

                let part = upload.parts.get(&listed.part_number).ok_or_else(|| {
                    StorageError::InvalidPart(format!("part {} was not uploaded", listed.part_number))
                })?;
                if strip_etag_quotes(&part.etag) != strip_etag_quotes(&listed.etag) {
                    return Err(StorageError::InvalidPart(format!(
                        "etag mismatch for part {}",
                        listed.part_number
                    )));
                }

                let is_last = index + 1 == parts.len();
                if !is_last && (part.data.len() as u64) < self.min_part_size {
                    return Err(StorageError::EntityTooSmall(format!(
                        "part {} is {} bytes, minimum is {}",
                        listed.part_number,
                        part.data.len(),
                        self.min_part_size
                    )));
                }

                total += part.data.len() as u64;
                stored.push(part);
            }

            let mut data = BytesMut::with_capacity(total as usize);
            for part in &stored {
                data.extend_from_slice(&part.data);
            }
            let etags: Vec<&str> = stored.iter().map(|part| part.etag.as_str()).collect();

            (
                StoredObject {
                    etag: multipart_etag(&etags),
                    data: data.freeze(),
                    content_type: upload.content_type.clone(),
                    uploaded: Utc::now(),
                },
                stored.len(),
            )
        };

        if self.uploads.remove(upload_id).is_none() {
            // Aborted concurrently between validation and commit.
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }

        let info = object.info(key);
        self.objects.write().insert(key.to_string(), object);

        tracing::debug!(parts = part_count, size = info.size, "Assembled multipart object");
        Ok(info)
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        match self.uploads.remove_if(upload_id, |_, upload| upload.key == key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NoSuchUpload(upload_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 8;

    fn part(part_number: u32, etag: &str) -> CompletedPart {
        CompletedPart {
            part_number,
            etag: etag.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_get_head() {
        let backend = MemoryBackend::new(MIN);
        let info = backend
            .put_object("a.txt", Bytes::from_static(b"hello"), Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert!(info.etag.starts_with('"'));

        let head = backend.head_object("a.txt").await.unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));

        let body = backend.get_object("a.txt", None).await.unwrap();
        assert_eq!(&body.body[..], b"hello");
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let backend = MemoryBackend::new(MIN);
        backend
            .put_object("r", Bytes::from_static(b"0123456789"), None)
            .await
            .unwrap();
        let range = crate::range::parse_range("bytes=2-4", 10).unwrap();
        let body = backend.get_object("r", Some(range)).await.unwrap();
        assert_eq!(&body.body[..], b"234");
        assert_eq!(body.info.size, 10);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let backend = MemoryBackend::new(MIN);
        assert!(matches!(
            backend.head_object("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            backend.get_object("nope", None).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages_with_cursor() {
        let backend = MemoryBackend::new(MIN);
        for key in ["c", "a", "b", "d", "e"] {
            backend
                .put_object(key, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }

        let first = backend.list_objects(None, 2).await.unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(first.cursor.as_deref(), Some("b"));

        let second = backend.list_objects(first.cursor, 2).await.unwrap();
        assert_eq!(second.objects.len(), 2);
        let third = backend.list_objects(second.cursor, 2).await.unwrap();
        assert_eq!(third.objects.len(), 1);
        assert!(third.cursor.is_none());
    }

    #[tokio::test]
    async fn test_multipart_last_write_wins() {
        let backend = MemoryBackend::new(MIN);
        let id = backend.create_multipart_upload("k", None).await.unwrap();

        backend
            .upload_part("k", &id, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();
        backend
            .upload_part("k", &id, 1, Bytes::from_static(b"AAAAAAAA"))
            .await
            .unwrap();
        let e1 = backend
            .upload_part("k", &id, 1, Bytes::from_static(b"BBBBBBBB"))
            .await
            .unwrap();
        let e2 = content_etag(b"tail");

        let info = backend
            .complete_multipart_upload("k", &id, &[part(1, &e1), part(2, &e2)])
            .await
            .unwrap();
        assert_eq!(info.size, 12);
        assert!(info.etag.ends_with("-2\""));

        let body = backend.get_object("k", None).await.unwrap();
        assert_eq!(&body.body[..], b"BBBBBBBBtail");
        assert_eq!(backend.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_undersized_non_final_part_keeps_session_open() {
        let backend = MemoryBackend::new(MIN);
        let id = backend.create_multipart_upload("k", None).await.unwrap();
        let e1 = backend
            .upload_part("k", &id, 1, Bytes::from_static(b"tiny"))
            .await
            .unwrap();
        let e2 = backend
            .upload_part("k", &id, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();

        let result = backend
            .complete_multipart_upload("k", &id, &[part(1, &e1), part(2, &e2)])
            .await;
        assert!(matches!(result, Err(StorageError::EntityTooSmall(_))));
        assert_eq!(backend.open_uploads(), 1);
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn test_etag_mismatch_and_missing_part() {
        let backend = MemoryBackend::new(MIN);
        let id = backend.create_multipart_upload("k", None).await.unwrap();
        backend
            .upload_part("k", &id, 1, Bytes::from_static(b"data"))
            .await
            .unwrap();

        let mismatch = backend
            .complete_multipart_upload("k", &id, &[part(1, "\"bogus\"")])
            .await;
        assert!(matches!(mismatch, Err(StorageError::InvalidPart(_))));

        let missing = backend
            .complete_multipart_upload("k", &id, &[part(3, "\"x\"")])
            .await;
        assert!(matches!(missing, Err(StorageError::InvalidPart(_))));
    }

    #[tokio::test]
    async fn test_abort_discards_upload() {
        let backend = MemoryBackend::new(MIN);
        let id = backend.create_multipart_upload("k", None).await.unwrap();
        backend.abort_multipart_upload("k", &id).await.unwrap();

        let again = backend.abort_multipart_upload("k", &id).await;
        assert!(matches!(again, Err(StorageError::NoSuchUpload(_))));

        let part = backend
            .upload_part("k", &id, 1, Bytes::from_static(b"late"))
            .await;
        assert!(matches!(part, Err(StorageError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_upload_id_bound_to_key() {
        let backend = MemoryBackend::new(MIN);
        let id = backend.create_multipart_upload("k", None).await.unwrap();
        let result = backend
            .upload_part("other", &id, 1, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::NoSuchUpload(_))));
    }
}
