//! Route handlers
//!
//! Each handler turns a parsed request into a response or an [`ApiError`].
//! CORS, auth and error rendering happen around them in the gateway.

use super::error::ApiError;
use super::response::{json_response, success};
use crate::config::Config;
use crate::range::{RangeResponder, ReadOutcome};
use crate::router::{QueryParams, Route};
use crate::storage::{ObjectInfo, StorageBackend};
use crate::upload::multipart::parse_part_number;
use crate::upload::{FilePart, MultipartCoordinator, PartReceipt, SimpleUploader, UploadError};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    LAST_MODIFIED, RANGE,
};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

/// Request data handed to a handler
#[derive(Debug, Default)]
pub struct RequestContext {
    pub query: QueryParams,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestContext {
    fn header(&self, name: impl hyper::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ApiError> {
        if self.body.is_empty() {
            return Err(ApiError::BadRequest("Missing request body".into()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadResponse<'a> {
    key: &'a str,
    upload_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadRequest {
    #[serde(default)]
    upload_id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    parts: Vec<PartReceipt>,
}

#[derive(Debug, Serialize)]
struct CompleteUploadResponse<'a> {
    key: &'a str,
    etag: &'a str,
    size: u64,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    key: Option<String>,
}

/// Handlers for every gateway route
#[derive(Clone)]
pub struct Handlers {
    storage: Arc<dyn StorageBackend>,
    multipart: MultipartCoordinator,
    uploader: SimpleUploader,
    responder: RangeResponder,
    list_page_size: usize,
}

impl Handlers {
    pub fn new(config: &Config, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            multipart: MultipartCoordinator::new(storage.clone(), config.upload.min_part_size),
            uploader: SimpleUploader::new(storage.clone()),
            responder: RangeResponder::new(storage.clone()),
            list_page_size: config.upload.list_page_size,
            storage,
        }
    }

    /// Run the handler for `route`
    pub async fn dispatch(
        &self,
        route: Route,
        ctx: RequestContext,
    ) -> Result<Response<Full<Bytes>>, ApiError> {
        match route {
            Route::CreateUpload => self.create_upload(ctx).await,
            Route::UploadPart => self.upload_part(ctx).await,
            Route::CompleteUpload => self.complete_upload(ctx).await,
            Route::AbortUpload => self.abort_upload(ctx).await,
            Route::SimpleUpload => self.simple_upload(ctx).await,
            Route::ReadObject => self.read_object(ctx).await,
            Route::DeleteObject => self.delete_object(ctx).await,
            Route::ListObjects => self.list_objects().await,
            Route::Health => Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "status": "ok" }),
            )),
            Route::Preflight => Ok(super::response::empty(StatusCode::OK)),
        }
    }

    async fn create_upload(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let request: CreateUploadRequest = ctx.json()?;
        let key = request.key.unwrap_or_default();
        let session = self
            .multipart
            .create(&key, request.content_type.as_deref())
            .await?;

        Ok(success(&CreateUploadResponse {
            key: &session.key,
            upload_id: &session.upload_id,
        }))
    }

    async fn upload_part(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let (Some(upload_id), Some(raw_part), Some(key)) = (
            ctx.query.get("uploadId").filter(|v| !v.is_empty()),
            ctx.query.get("partNumber").filter(|v| !v.is_empty()),
            ctx.query.get("key").filter(|v| !v.is_empty()),
        ) else {
            return Err(UploadError::MissingParameter("uploadId, partNumber, or key").into());
        };
        let part_number = parse_part_number(raw_part)?;

        let receipt = self
            .multipart
            .upload_part(key, upload_id, part_number, ctx.body.clone())
            .await?;
        Ok(success(&receipt))
    }

    async fn complete_upload(
        &self,
        ctx: RequestContext,
    ) -> Result<Response<Full<Bytes>>, ApiError> {
        let request: CompleteUploadRequest = ctx.json()?;
        let (Some(upload_id), Some(key)) = (request.upload_id, request.key) else {
            return Err(UploadError::MissingParameter("required parameters").into());
        };

        let info = self
            .multipart
            .complete(&key, &upload_id, request.parts)
            .await?;
        Ok(success(&CompleteUploadResponse {
            key: &info.key,
            etag: &info.etag,
            size: info.size,
        }))
    }

    async fn abort_upload(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let (Some(upload_id), Some(key)) = (ctx.query.get("uploadId"), ctx.query.get("key")) else {
            return Err(UploadError::MissingParameter("uploadId or key").into());
        };

        self.multipart.abort(key, upload_id).await?;
        Ok(success(&serde_json::json!({ "key": key, "aborted": true })))
    }

    async fn simple_upload(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let content_type = ctx.header(CONTENT_TYPE).unwrap_or_default();
        let boundary = multer::parse_boundary(content_type).map_err(|_| {
            ApiError::BadRequest("Expected multipart/form-data with boundary".into())
        })?;

        let body = ctx.body;
        let mut multipart = multer::Multipart::new(
            futures::stream::once(async move { Ok::<Bytes, Infallible>(body) }),
            boundary,
        );

        let mut file = None;
        let mut key = None;
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let content_type = field.content_type().map(|m| m.to_string());
                    let data = field.bytes().await.map_err(form_error)?;
                    file = Some(FilePart {
                        file_name,
                        content_type,
                        data,
                    });
                }
                Some("key") => key = Some(field.text().await.map_err(form_error)?),
                _ => {}
            }
        }

        let file = file.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
        let receipt = self.uploader.upload(file, key.as_deref()).await?;
        Ok(success(&receipt))
    }

    async fn read_object(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let key = ctx
            .query
            .get("key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing key parameter".into()))?;

        // A Range header that is not visible ASCII is still a Range header;
        // an empty value makes the parser reject it.
        let range = ctx
            .headers
            .get(RANGE)
            .map(|v| v.to_str().unwrap_or_default());
        let outcome = self.responder.read(key, range).await?;
        crate::metrics::record_range_read(outcome.label(), outcome.body_len());

        match outcome {
            ReadOutcome::Full { info, body } => {
                Ok(object_response(StatusCode::OK, &info, body, None))
            }
            ReadOutcome::Partial { info, range, body } => {
                let content_range = range.content_range(info.size);
                Ok(object_response(
                    StatusCode::PARTIAL_CONTENT,
                    &info,
                    body,
                    Some(&content_range),
                ))
            }
            ReadOutcome::Unsatisfiable { size } => Err(ApiError::RangeNotSatisfiable { size }),
        }
    }

    async fn delete_object(&self, ctx: RequestContext) -> Result<Response<Full<Bytes>>, ApiError> {
        let is_json = ctx
            .header(CONTENT_TYPE)
            .is_some_and(|ct| ct.contains("application/json"));
        let from_body = if is_json && !ctx.body.is_empty() {
            ctx.json::<DeleteRequest>()?
        } else {
            DeleteRequest::default()
        };
        let key = from_body
            .key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| ctx.query.get("key").map(|k| k.trim().to_string()))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing key parameter".into()))?;

        self.storage.head_object(&key).await?;
        self.storage.delete_object(&key).await?;
        tracing::info!(key = %key, "Deleted object");

        Ok(success(&serde_json::json!({ "key": key, "deleted": true })))
    }

    async fn list_objects(&self) -> Result<Response<Full<Bytes>>, ApiError> {
        let mut objects: Vec<ObjectInfo> = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .storage
                .list_objects(cursor.take(), self.list_page_size)
                .await?;
            objects.extend(page.objects);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = objects.len(), "Listed objects");
        Ok(json_response(StatusCode::OK, &objects))
    }
}

fn form_error(err: multer::Error) -> ApiError {
    ApiError::BadRequest(format!("Invalid form data: {}", err))
}

/// Object body with its descriptor headers
fn object_response(
    status: StatusCode,
    info: &ObjectInfo,
    body: Bytes,
    content_range: Option<&str>,
) -> Response<Full<Bytes>> {
    let len = body.len() as u64;
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    let content_type = info
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&info.etag) {
        headers.insert(ETAG, value);
    }
    let modified = info
        .uploaded
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&modified) {
        headers.insert(LAST_MODIFIED, value);
    }
    if let Some(range) = content_range.and_then(|r| HeaderValue::from_str(r).ok()) {
        headers.insert(CONTENT_RANGE, range);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, MockStorageBackend, StorageError};
    use http_body_util::BodyExt;

    fn handlers_with(storage: Arc<dyn StorageBackend>) -> Handlers {
        let mut config = Config::default();
        config.upload.min_part_size = 4;
        config.upload.chunk_size = 4;
        config.upload.list_page_size = 2;
        Handlers::new(&config, storage)
    }

    fn ctx(query: &str, body: &[u8]) -> RequestContext {
        RequestContext {
            query: QueryParams::parse(Some(query)),
            headers: HeaderMap::new(),
            body: Bytes::copy_from_slice(body),
        }
    }

    async fn json_of(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_response_shape() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let response = handlers
            .dispatch(Route::CreateUpload, ctx("", br#"{"key":"big.bin"}"#))
            .await
            .unwrap();
        let json = json_of(response).await;
        assert_eq!(json["key"], "big.bin");
        assert_eq!(json["success"], true);
        assert!(json["uploadId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_create_without_body() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let err = handlers
            .dispatch(Route::CreateUpload, ctx("", b""))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::BadRequest("Missing request body".into()));
    }

    #[tokio::test]
    async fn test_upload_part_missing_params() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let err = handlers
            .dispatch(Route::UploadPart, ctx("uploadId=u&key=k", b"data"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::BadRequest("Missing uploadId, partNumber, or key".into())
        );

        let err = handlers
            .dispatch(Route::UploadPart, ctx("uploadId=u&key=k&partNumber=x", b"data"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_pages_through_cursors() {
        let storage = Arc::new(MemoryBackend::new(4));
        for key in ["a", "b", "c", "d", "e"] {
            storage
                .put_object(key, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }
        let handlers = handlers_with(storage);

        let response = handlers
            .dispatch(Route::ListObjects, ctx("", b""))
            .await
            .unwrap();
        let json = json_of(response).await;
        let keys: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_list_backend_failure_is_internal() {
        let mut storage = MockStorageBackend::new();
        storage
            .expect_list_objects()
            .returning(|_, _| Err(StorageError::Backend("timeout".into())));

        let handlers = handlers_with(Arc::new(storage));
        let err = handlers
            .dispatch(Route::ListObjects, ctx("", b""))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn json_ctx(query: &str, body: &[u8]) -> RequestContext {
        let mut request = ctx(query, body);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
    }

    #[tokio::test]
    async fn test_delete_missing_object() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let err = handlers
            .dispatch(Route::DeleteObject, json_ctx("", br#"{"key":"ghost"}"#))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NotFound("File not found".into()));
    }

    #[tokio::test]
    async fn test_delete_ignores_non_json_body() {
        let storage = Arc::new(MemoryBackend::new(4));
        storage
            .put_object("doc.txt", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        let handlers = handlers_with(storage.clone());

        let mut request = ctx("key=doc.txt", b"key=other");
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let response = handlers
            .dispatch(Route::DeleteObject, request)
            .await
            .unwrap();

        assert_eq!(json_of(response).await["key"], "doc.txt");
        assert_eq!(storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_json_without_key_uses_query() {
        let storage = Arc::new(MemoryBackend::new(4));
        storage
            .put_object("doc.txt", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        let handlers = handlers_with(storage.clone());

        let response = handlers
            .dispatch(Route::DeleteObject, json_ctx("key=doc.txt", br#"{"key":"  "}"#))
            .await
            .unwrap();

        assert_eq!(json_of(response).await["deleted"], true);
        assert_eq!(storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_malformed_json_is_400() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let err = handlers
            .dispatch(Route::DeleteObject, json_ctx("key=doc.txt", b"{not json"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_by_query_key() {
        let storage = Arc::new(MemoryBackend::new(4));
        storage
            .put_object("doc.txt", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        let handlers = handlers_with(storage.clone());

        let response = handlers
            .dispatch(Route::DeleteObject, ctx("key=doc.txt", b""))
            .await
            .unwrap();
        assert_eq!(json_of(response).await["deleted"], true);
        assert_eq!(storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_read_object_headers() {
        let storage = Arc::new(MemoryBackend::new(4));
        storage
            .put_object("a.txt", Bytes::from_static(b"0123456789"), Some("text/plain"))
            .await
            .unwrap();
        let handlers = handlers_with(storage);

        let mut request = ctx("key=a.txt", b"");
        request
            .headers
            .insert(RANGE, HeaderValue::from_static("bytes=2-4"));
        let response = handlers
            .dispatch(Route::ReadObject, request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 2-4/10");
        assert_eq!(response.headers()[CONTENT_LENGTH], "3");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert!(response.headers().contains_key(ETAG));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"234");
    }

    #[tokio::test]
    async fn test_non_ascii_range_is_unsatisfiable() {
        let storage = Arc::new(MemoryBackend::new(4));
        storage
            .put_object("k", Bytes::from_static(b"0123456789"), None)
            .await
            .unwrap();
        let handlers = handlers_with(storage);

        let mut request = ctx("key=k", b"");
        request.headers.insert(
            RANGE,
            HeaderValue::from_bytes(b"bytes=\xff-1").unwrap(),
        );
        let err = handlers
            .dispatch(Route::ReadObject, request)
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::RangeNotSatisfiable { size: 10 });
    }

    #[tokio::test]
    async fn test_simple_upload_form() {
        let storage = Arc::new(MemoryBackend::new(4));
        let handlers = handlers_with(storage.clone());

        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"key\"\r\n\r\n\
            docs/readme.txt\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"readme.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --XYZ--\r\n";
        let mut request = ctx("", body.as_bytes());
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=XYZ"),
        );

        let response = handlers
            .dispatch(Route::SimpleUpload, request)
            .await
            .unwrap();
        let json = json_of(response).await;
        assert_eq!(json["key"], "docs/readme.txt");
        assert_eq!(json["replaced"], true);
        assert_eq!(json["size"], 5);
        assert_eq!(json["type"], "text/plain");
        assert!(storage.head_object("docs/readme.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_simple_upload_without_file() {
        let handlers = handlers_with(Arc::new(MemoryBackend::new(4)));
        let body = "--XYZ\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\nk\r\n--XYZ--\r\n";
        let mut request = ctx("", body.as_bytes());
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=XYZ"),
        );

        let err = handlers
            .dispatch(Route::SimpleUpload, request)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::BadRequest("No file provided".into()));
    }
}
