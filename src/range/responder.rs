//! Range-read responder
//!
//! Resolves an optional `Range` header against a stored object and reads
//! exactly the selected window from the backend.

use super::{parse_range, ByteRange, RangeError};
use crate::storage::{ObjectInfo, StorageBackend, StorageError};
use bytes::Bytes;
use std::sync::Arc;

/// Result of an object read
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// No range requested: the whole object
    Full { info: ObjectInfo, body: Bytes },
    /// The requested window
    Partial {
        info: ObjectInfo,
        range: ByteRange,
        body: Bytes,
    },
    /// The range cannot be served for an object of `size` bytes
    Unsatisfiable { size: u64 },
}

impl ReadOutcome {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            ReadOutcome::Full { .. } => "full",
            ReadOutcome::Partial { .. } => "partial",
            ReadOutcome::Unsatisfiable { .. } => "unsatisfiable",
        }
    }

    /// Bytes carried in the response body
    pub fn body_len(&self) -> u64 {
        match self {
            ReadOutcome::Full { body, .. } | ReadOutcome::Partial { body, .. } => {
                body.len() as u64
            }
            ReadOutcome::Unsatisfiable { .. } => 0,
        }
    }
}

/// Serves whole and ranged object reads
#[derive(Clone)]
pub struct RangeResponder {
    storage: Arc<dyn StorageBackend>,
}

impl RangeResponder {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Read `key`, honouring `range_header` when present.
    ///
    /// A ranged read probes the object size first, so the parse happens
    /// against the real size and the backend only ever sees a valid window.
    #[tracing::instrument(
        name = "range.read",
        skip(self),
        fields(
            range.outcome = tracing::field::Empty,
            range.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn read(
        &self,
        key: &str,
        range_header: Option<&str>,
    ) -> Result<ReadOutcome, StorageError> {
        let outcome = match range_header {
            None => {
                let object = self.storage.get_object(key, None).await?;
                ReadOutcome::Full {
                    info: object.info,
                    body: object.body,
                }
            }
            Some(header) => {
                let info = self.storage.head_object(key).await?;
                match parse_range(header, info.size) {
                    Ok(range) => self.read_window(key, range).await?,
                    Err(RangeError::Unparseable(reason)) => {
                        tracing::debug!(header = %header, reason = %reason, "Rejecting malformed range");
                        ReadOutcome::Unsatisfiable { size: info.size }
                    }
                    Err(RangeError::Unsatisfiable { size }) => {
                        ReadOutcome::Unsatisfiable { size }
                    }
                }
            }
        };

        let span = tracing::Span::current();
        span.record("range.outcome", outcome.label());
        span.record("range.bytes", outcome.body_len());
        Ok(outcome)
    }

    async fn read_window(&self, key: &str, range: ByteRange) -> Result<ReadOutcome, StorageError> {
        let object = match self.storage.get_object(key, Some(range)).await {
            Ok(object) => object,
            // Object shrank between head and get
            Err(StorageError::InvalidRange) => {
                let size = self.storage.head_object(key).await?.size;
                return Ok(ReadOutcome::Unsatisfiable { size });
            }
            Err(e) => return Err(e),
        };

        if object.body.len() as u64 != range.len() {
            return Err(StorageError::Backend(format!(
                "backend returned {} bytes for range {}-{}",
                object.body.len(),
                range.start(),
                range.end()
            )));
        }

        Ok(ReadOutcome::Partial {
            info: object.info,
            range,
            body: object.body,
        })
    }
}
