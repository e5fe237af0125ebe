//! Upload module
//!
//! Multipart upload coordination, client-side chunk planning, and the
//! single-shot upload path for small files.

use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chunking;
pub mod multipart;
pub mod put_object;

pub use chunking::{Chunk, ChunkPlan};
pub use multipart::{MultipartCoordinator, MAX_PARTS};
pub use put_object::{FilePart, SimpleUploadReceipt, SimpleUploader};

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Missing {0}")]
    MissingParameter(&'static str),

    #[error("Invalid part number: {0}")]
    InvalidPartNumber(String),

    #[error("Duplicate part number: {0}")]
    DuplicatePart(u32),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("Cannot split an empty file into parts")]
    EmptyFile,

    /// The backend refused data the client sent (unknown upload, bad part list, undersized part)
    #[error("{0}")]
    Rejected(StorageError),

    /// The backend failed on its own
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        if err.is_client_fault() {
            UploadError::Rejected(err)
        } else {
            UploadError::Storage(err)
        }
    }
}

impl UploadError {
    /// Whether the caller can fix the request (maps to 400)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Storage(_))
    }
}

/// Receipt for one stored part; the caller keeps these for completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartReceipt {
    pub part_number: u32,
    pub etag: String,
}

impl From<PartReceipt> for crate::storage::CompletedPart {
    fn from(receipt: PartReceipt) -> Self {
        Self {
            part_number: receipt.part_number,
            etag: receipt.etag,
        }
    }
}

/// A multipart upload in progress, as tracked by the client.
///
/// The backend holds the parts; this value carries the upload id and the
/// receipts needed to complete it between round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub key: String,
    pub upload_id: String,
    #[serde(default)]
    pub parts: Vec<PartReceipt>,
}

impl UploadSession {
    /// Start tracking a freshly created upload
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    /// Record a stored part.
    ///
    /// A receipt for an already recorded part number replaces the old one.
    /// Receipts stay sorted by part number.
    pub fn record(&mut self, receipt: PartReceipt) {
        match self
            .parts
            .binary_search_by_key(&receipt.part_number, |p| p.part_number)
        {
            Ok(index) => self.parts[index] = receipt,
            Err(index) => self.parts.insert(index, receipt),
        }
    }

    /// Number of distinct parts recorded
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}
