//! Gateway client
//!
//! HTTP client for the gateway API. [`GatewayClient::upload_file`] runs the
//! chunked upload: plan the chunks, create a session, send each part in
//! order, then complete with the collected receipts.

use crate::storage::ObjectInfo;
use crate::upload::{ChunkPlan, PartReceipt, SimpleUploadReceipt, UploadError, UploadSession};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const MULTIPART_PATH: &str = "/api/multipart-upload";

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error status
    #[error("Gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl ClientError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            ClientError::Upload(_) => None,
        }
    }
}

/// Result of a completed multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompletedUpload {
    pub key: String,
    pub etag: String,
    pub size: u64,
}

/// Body and range metadata of an object read
#[derive(Debug, Clone)]
pub struct ObjectRead {
    pub status: u16,
    pub content_range: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUploadResponse {
    key: String,
    upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadRequest<'a> {
    upload_id: &'a str,
    key: &'a str,
    parts: &'a [PartReceipt],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for one gateway
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayClient {
    /// `base_url` includes any base path, e.g. `http://localhost:8080/files`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on every request
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = self.authorized(builder).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Open a multipart upload
    pub async fn create_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<UploadSession, ClientError> {
        let builder = self
            .http
            .post(self.url(MULTIPART_PATH))
            .query(&[("action", "create")])
            .json(&serde_json::json!({ "key": key, "contentType": content_type }));
        let created: CreateUploadResponse = self.send_json(builder).await?;
        Ok(UploadSession::new(created.key, created.upload_id))
    }

    /// Send one part and record its receipt in `session`
    pub async fn upload_part(
        &self,
        session: &mut UploadSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<PartReceipt, ClientError> {
        let part = part_number.to_string();
        let builder = self
            .http
            .put(self.url(MULTIPART_PATH))
            .query(&[
                ("action", "upload-part"),
                ("uploadId", session.upload_id.as_str()),
                ("partNumber", part.as_str()),
                ("key", session.key.as_str()),
            ])
            .body(body);
        let receipt: PartReceipt = self.send_json(builder).await?;
        session.record(receipt.clone());
        Ok(receipt)
    }

    /// Commit the recorded parts
    pub async fn complete_upload(
        &self,
        session: &UploadSession,
    ) -> Result<CompletedUpload, ClientError> {
        let builder = self
            .http
            .post(self.url(MULTIPART_PATH))
            .query(&[("action", "complete")])
            .json(&CompleteUploadRequest {
                upload_id: &session.upload_id,
                key: &session.key,
                parts: &session.parts,
            });
        self.send_json(builder).await
    }

    /// Discard the session and its parts
    pub async fn abort_upload(&self, session: &UploadSession) -> Result<(), ClientError> {
        let builder = self.http.delete(self.url(MULTIPART_PATH)).query(&[
            ("action", "abort"),
            ("uploadId", session.upload_id.as_str()),
            ("key", session.key.as_str()),
        ]);
        let _: serde_json::Value = self.send_json(builder).await?;
        Ok(())
    }

    /// Upload `data` in `chunk_size` parts under `key`.
    ///
    /// `progress` is called after each stored part with
    /// `(parts_done, total_parts)`. A failed part stops the upload; the
    /// session is left open for the caller to retry or abort.
    #[tracing::instrument(
        name = "client.upload_file",
        skip(self, data, progress),
        fields(upload.bytes = data.len(), upload.parts = tracing::field::Empty),
        err
    )]
    pub async fn upload_file<F>(
        &self,
        key: &str,
        data: Bytes,
        chunk_size: u64,
        content_type: Option<&str>,
        mut progress: F,
    ) -> Result<CompletedUpload, ClientError>
    where
        F: FnMut(u32, u32),
    {
        let plan = ChunkPlan::new(data.len() as u64, chunk_size)?;
        tracing::Span::current().record("upload.parts", plan.total_parts());

        let mut session = self.create_upload(key, content_type).await?;
        for chunk in plan.chunks() {
            let body = data.slice(chunk.offset as usize..chunk.end() as usize);
            self.upload_part(&mut session, chunk.part_number, body).await?;
            progress(chunk.part_number, plan.total_parts());
            tracing::debug!(
                part_number = chunk.part_number,
                total_parts = plan.total_parts(),
                progress = plan.progress(chunk.part_number),
                "Part stored"
            );
        }

        self.complete_upload(&session).await
    }

    /// Single-request upload through the form endpoint
    pub async fn simple_upload(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: Option<&str>,
        key: Option<&str>,
    ) -> Result<SimpleUploadReceipt, ClientError> {
        let mut file = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string());
        if let Some(content_type) = content_type {
            file = file.mime_str(content_type)?;
        }
        let mut form = reqwest::multipart::Form::new().part("file", file);
        if let Some(key) = key {
            form = form.text("key", key.to_string());
        }

        let builder = self.http.post(self.url("/api/upload")).multipart(form);
        self.send_json(builder).await
    }

    /// Read an object, optionally with a `Range` header value
    pub async fn read_object(&self, key: &str, range: Option<&str>) -> Result<ObjectRead, ClientError> {
        let mut builder = self.http.get(self.url("/api/asset")).query(&[("key", key)]);
        if let Some(range) = range {
            builder = builder.header(RANGE, range);
        }

        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(ObjectRead {
                status: status.as_u16(),
                content_range,
                body: Bytes::new(),
            });
        }
        let response = check_status(response).await?;
        Ok(ObjectRead {
            status: status.as_u16(),
            content_range,
            body: response.bytes().await?,
        })
    }

    /// All objects in key order
    pub async fn list_objects(&self) -> Result<Vec<ObjectInfo>, ClientError> {
        self.send_json(self.http.get(self.url("/api/list-assets")))
            .await
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), ClientError> {
        let builder = self
            .http
            .delete(self.url("/api/delete-asset"))
            .json(&serde_json::json!({ "key": key }));
        let _: serde_json::Value = self.send_json(builder).await?;
        Ok(())
    }
}

/// Turn an error status into `ClientError::Api` with the gateway's message
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
